use super::keys::SeedSet;

const ROOT_DIR_ID_CONTEXT: &str = "hubvault 2024-06 root directory id";
const DIR_ID_HASH_CONTEXT: &str = "hubvault 2024-06 directory id hash";
/// Directory id hashes are truncated to this many bytes
pub const DIR_ID_HASH_SIZE: usize = 20;

/// Id of the vault's root directory, fixed by the initial seed and KDF salt
pub fn compute_root_directory_id(seeds: &SeedSet) -> [u8; 32] {
    *seeds
        .initial_seed()
        .derive(ROOT_DIR_ID_CONTEXT, seeds.kdf_salt())
        .bytes()
}

/// Storage name of a directory: keyed BLAKE3 of its id, upper-case hex
pub fn compute_root_directory_id_hash(dir_id: &[u8], seeds: &SeedSet) -> String {
    let key = seeds
        .initial_seed()
        .derive(DIR_ID_HASH_CONTEXT, seeds.kdf_salt());
    let hash = blake3::keyed_hash(key.bytes(), dir_id);
    hex::encode_upper(&hash.as_bytes()[..DIR_ID_HASH_SIZE])
}

/// Storage path of a directory: `d/XX/YYYY...`
pub fn root_directory_path(dir_id_hash: &str) -> String {
    let split = dir_id_hash.len().min(2);
    let (prefix, rest) = dir_id_hash.split_at(split);
    format!("d/{prefix}/{rest}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_root_dir_survives_rotation() {
        let mut seeds = SeedSet::generate();
        let id = compute_root_directory_id(&seeds);
        let hash = compute_root_directory_id_hash(&id, &seeds);

        seeds.rotate();
        assert_eq!(compute_root_directory_id(&seeds), id);
        assert_eq!(compute_root_directory_id_hash(&id, &seeds), hash);
    }

    #[test]
    fn test_hash_format() {
        let seeds = SeedSet::generate();
        let hash = compute_root_directory_id_hash(&compute_root_directory_id(&seeds), &seeds);
        assert_eq!(hash.len(), DIR_ID_HASH_SIZE * 2);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

        let path = root_directory_path(&hash);
        assert_eq!(&path[..2], "d/");
        assert_eq!(&path[2..4], &hash[..2]);
        assert_eq!(&path[5..], &hash[2..]);
    }

    #[test]
    fn test_different_vaults_have_different_roots() {
        let (a, b) = (SeedSet::generate(), SeedSet::generate());
        assert_ne!(compute_root_directory_id(&a), compute_root_directory_id(&b));
    }
}
