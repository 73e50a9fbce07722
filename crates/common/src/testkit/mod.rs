/// In-memory collaborators for exercising the services without a hub
///
/// - [`MemoryHub`]: a hub shared by several users, each seen through their
///   own handle ([`MemoryHub::as_user`]), with call counters
/// - [`ScriptedPrompt`]: answers prompts from a queue, or cancels
/// - [`MemorySecretStore`]: a secret store that can be told to deny access
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::{MemoryHub, MemorySecretStore, ScriptedPrompt};
///
/// #[tokio::test]
/// async fn test_first_login() -> anyhow::Result<()> {
///     let hub = MemoryHub::new();
///     hub.add_user("alice", "Alice");
///
///     let session = HubSession::new(
///         "hub",
///         Arc::new(hub.as_user("alice")),
///         Arc::new(ScriptedPrompt::new("laptop")),
///         Arc::new(MemorySecretStore::new()),
///         SessionConfig::default(),
///     );
///     session.login().await?;
///     Ok(())
/// }
/// ```
mod hub;
mod prompt;
mod secret_store;

pub use hub::{CallCounts, MemoryHub};
pub use prompt::ScriptedPrompt;
pub use secret_store::MemorySecretStore;
