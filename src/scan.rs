use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

pub const ARCHIVE_FILE_NAME: &str = "ECU.ZIP";

/// Nesting limit below each root. Symlinked directories are never followed.
const MAX_DEPTH: usize = 32;

/// Roots searched when no archive is given, in order.
pub fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    roots.extend(dirs::home_dir());
    roots.extend(dirs::data_local_dir());
    roots.push(PathBuf::from("/storage"));
    roots.push(PathBuf::from("/mnt"));
    roots.dedup();
    roots
}

/// Returns the first `ECU.ZIP` (any case) found under `roots`, trying each
/// root in turn.
pub fn find_archive(roots: &[PathBuf]) -> Option<PathBuf> {
    roots.iter().find_map(|root| find_archive_in(root))
}

/// Depth-first search of one root.
///
/// Directory entries are visited in file name order and a subdirectory is
/// fully explored before any later sibling, so the first hit is stable.
pub fn find_archive_in(root: &Path) -> Option<PathBuf> {
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .max_depth(Some(MAX_DEPTH))
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    walker
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .find(|entry| is_archive_name(&entry.file_name().to_string_lossy()))
        .map(ignore::DirEntry::into_path)
}

fn is_archive_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(ARCHIVE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn finds_archive_case_insensitively_depth_first() {
        let base = temp_dir("ecu-finder-scan");
        fs::create_dir_all(base.join("a/deep/er")).unwrap();
        fs::create_dir_all(base.join("b")).unwrap();
        fs::write(base.join("a/deep/er/ecu.zip"), b"x").unwrap();
        fs::write(base.join("b/ECU.ZIP"), b"x").unwrap();
        fs::write(base.join("c_Ecu.Zip"), b"x").unwrap();

        assert_eq!(find_archive_in(&base), Some(base.join("a/deep/er/ecu.zip")));
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn entries_are_visited_in_name_order() {
        let base = temp_dir("ecu-finder-scan-order");
        fs::create_dir_all(base.join("z")).unwrap();
        fs::write(base.join("z/ECU.ZIP"), b"x").unwrap();
        fs::write(base.join("ECU.ZIP"), b"x").unwrap();

        assert_eq!(find_archive_in(&base), Some(base.join("ECU.ZIP")));
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn hidden_and_ignored_directories_are_searched() {
        let base = temp_dir("ecu-finder-scan-hidden");
        fs::create_dir_all(base.join(".ddt/cache")).unwrap();
        fs::write(base.join(".ignore"), b"*\n").unwrap();
        fs::write(base.join(".gitignore"), b"*.zip\n").unwrap();
        fs::write(base.join(".ddt/cache/ECU.ZIP"), b"x").unwrap();

        assert_eq!(find_archive_in(&base), Some(base.join(".ddt/cache/ECU.ZIP")));
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn roots_are_tried_in_order_and_missing_roots_are_skipped() {
        let first = temp_dir("ecu-finder-scan-first");
        let second = temp_dir("ecu-finder-scan-second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(second.join("nested")).unwrap();
        fs::write(first.join("other.zip"), b"x").unwrap();
        fs::write(second.join("nested/ECU.zip"), b"x").unwrap();

        let roots = vec![temp_dir("ecu-finder-missing"), first.clone(), second.clone()];
        assert_eq!(find_archive(&roots), Some(second.join("nested/ECU.zip")));
        assert_eq!(find_archive(&roots[..2]), None);

        let _ = fs::remove_dir_all(first);
        let _ = fs::remove_dir_all(second);
    }
}
