//! Discovery of candidate payloads.
//!
//! The menu order is fixed: the payload bundled with the application
//! always comes first, then the application payload directory, then the
//! shared bootloader directory, then the two well known root files.

use std::fs;
use std::path::{Path, PathBuf};

/// Upper bound on catalog entries; enumeration stops once reached.
pub const MAX_PAYLOADS: usize = 20;

/// File name of the payload bundled in the resource directory.
pub const EMBEDDED_PAYLOAD_FILE: &str = "fusee.bin";
/// File name of the intermezzo relocator in the resource directory.
pub const INTERMEZZO_FILE: &str = "intermezzo.bin";

const PAYLOAD_EXTENSION: &str = "bin";
const APPLICATION_PAYLOAD_DIR: &str = "config/spacedock/payloads";
const SHARED_PAYLOAD_DIR: &str = "bootloader/payloads";
const REBOOT_PAYLOAD_FILE: &str = "reboot_payload.bin";
const BOOT_PAYLOAD_FILE: &str = "payload.bin";

/// One selectable payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadEntry {
    /// The payload bundled with the application resources. Listed even
    /// when the resource file is absent; assembly then degrades to a
    /// zeroed payload region.
    Embedded(PathBuf),
    /// A payload discovered on disk.
    File(PathBuf),
}

impl PayloadEntry {
    /// Location the payload is read from at injection time.
    pub fn path(&self) -> &Path {
        match self {
            PayloadEntry::Embedded(path) | PayloadEntry::File(path) => path,
        }
    }

    /// Human readable menu label.
    pub fn label(&self) -> String {
        match self {
            PayloadEntry::Embedded(_) => format!("{} (embedded)", EMBEDDED_PAYLOAD_FILE),
            PayloadEntry::File(path) => path.display().to_string(),
        }
    }
}

/// Enumerates the available payloads beneath `root`, in menu order.
pub fn enumerate(root: &Path, resources: &Path) -> Vec<PayloadEntry> {
    let mut entries = vec![PayloadEntry::Embedded(resources.join(EMBEDDED_PAYLOAD_FILE))];

    scan_directory(&root.join(APPLICATION_PAYLOAD_DIR), &mut entries);
    scan_directory(&root.join(SHARED_PAYLOAD_DIR), &mut entries);

    for name in &[REBOOT_PAYLOAD_FILE, BOOT_PAYLOAD_FILE] {
        if entries.len() == MAX_PAYLOADS {
            break;
        }

        let path = root.join(name);
        if path.is_file() {
            entries.push(PayloadEntry::File(path));
        }
    }

    entries
}

/// Collects `.bin` files from `dir`. A missing or unreadable directory
/// contributes nothing.
fn scan_directory(dir: &Path, entries: &mut Vec<PayloadEntry>) {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(_) => return,
    };

    let mut paths: Vec<PathBuf> = listing
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_payload_extension(path))
        .collect();
    // Directory read order is platform dependent; keep the menu stable.
    paths.sort();

    for path in paths {
        if entries.len() == MAX_PAYLOADS {
            return;
        }
        entries.push(PayloadEntry::File(path));
    }
}

fn has_payload_extension(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == PAYLOAD_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"payload").unwrap();
    }

    #[test]
    fn menu_order_is_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let resources = root.join("resources");

        touch(&root.join(APPLICATION_PAYLOAD_DIR).join("beta.bin"));
        touch(&root.join(APPLICATION_PAYLOAD_DIR).join("alpha.bin"));
        touch(&root.join(SHARED_PAYLOAD_DIR).join("hekate.bin"));
        touch(&root.join(REBOOT_PAYLOAD_FILE));
        touch(&root.join(BOOT_PAYLOAD_FILE));

        let entries = enumerate(root, &resources);

        assert_eq!(
            entries,
            vec![
                PayloadEntry::Embedded(resources.join(EMBEDDED_PAYLOAD_FILE)),
                PayloadEntry::File(root.join(APPLICATION_PAYLOAD_DIR).join("alpha.bin")),
                PayloadEntry::File(root.join(APPLICATION_PAYLOAD_DIR).join("beta.bin")),
                PayloadEntry::File(root.join(SHARED_PAYLOAD_DIR).join("hekate.bin")),
                PayloadEntry::File(root.join(REBOOT_PAYLOAD_FILE)),
                PayloadEntry::File(root.join(BOOT_PAYLOAD_FILE)),
            ]
        );
    }

    #[test]
    fn non_payload_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        touch(&root.join(APPLICATION_PAYLOAD_DIR).join("notes.txt"));
        touch(&root.join(APPLICATION_PAYLOAD_DIR).join("real.bin"));

        let entries = enumerate(root, &root.join("resources"));

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1],
            PayloadEntry::File(root.join(APPLICATION_PAYLOAD_DIR).join("real.bin"))
        );
    }

    #[test]
    fn enumeration_stops_at_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        for i in 0..25 {
            touch(&root.join(APPLICATION_PAYLOAD_DIR).join(format!("{:02}.bin", i)));
        }
        touch(&root.join(REBOOT_PAYLOAD_FILE));

        let entries = enumerate(root, &root.join("resources"));

        assert_eq!(entries.len(), MAX_PAYLOADS);
        // Root files never make it in once the cap is hit.
        assert!(!entries.contains(&PayloadEntry::File(root.join(REBOOT_PAYLOAD_FILE))));
    }

    #[test]
    fn empty_root_still_lists_the_embedded_payload() {
        let dir = tempfile::tempdir().unwrap();
        let resources = dir.path().join("resources");

        let entries = enumerate(dir.path(), &resources);

        assert_eq!(
            entries,
            vec![PayloadEntry::Embedded(resources.join(EMBEDDED_PAYLOAD_FILE))]
        );
    }
}
