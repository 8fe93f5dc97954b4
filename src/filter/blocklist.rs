//! Blacklist stores.
//!
//! [`FileBlacklist`] keeps one pattern per line in a flat text file and
//! rereads it on every lookup, so entries added through [`FileBlacklist::add`]
//! or by another process take effect on the next query. [`PatternList`] is
//! the in-memory equivalent.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{Blacklist, valid_pattern, wildcard_match};
use crate::error::BlacklistError;

fn is_entry(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('#')
}

/// Blacklist backed by a newline separated pattern file.
pub struct FileBlacklist {
    path: PathBuf,
    /// Serializes writers; lookups read the file without it.
    write_lock: Mutex<()>,
}

impl FileBlacklist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All patterns currently in the file.
    pub fn patterns(&self) -> Result<Vec<String>, BlacklistError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut patterns = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if is_entry(line) {
                patterns.push(line.to_string());
            }
        }
        Ok(patterns)
    }

    /// Append a pattern, creating the file if needed.
    pub fn add(&self, pattern: &str) -> Result<(), BlacklistError> {
        if !valid_pattern(pattern) {
            return Err(BlacklistError::InvalidPattern(pattern.to_string()));
        }

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{pattern}")?;
        debug!(pattern, "added to blacklist");
        Ok(())
    }

    /// Remove every line equal to `pattern`.
    pub fn remove(&self, pattern: &str) -> Result<(), BlacklistError> {
        if !valid_pattern(pattern) {
            return Err(BlacklistError::InvalidPattern(pattern.to_string()));
        }

        let _guard = self.write_lock.lock();
        let content = fs::read_to_string(&self.path)?;
        let mut found = false;
        let mut kept = String::with_capacity(content.len());
        for line in content.lines() {
            if line.trim_end_matches('\r') == pattern {
                found = true;
            } else {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        if !found {
            return Err(BlacklistError::NotFound(pattern.to_string()));
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, kept)?;
        fs::rename(&tmp, &self.path)?;
        debug!(pattern, "removed from blacklist");
        Ok(())
    }
}

impl Blacklist for FileBlacklist {
    fn is_blocked(&self, domain: &str) -> Result<bool, BlacklistError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            // No file yet means nothing has been blacklisted.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            let pattern = line.trim_end_matches(['\r', '\n']);
            if is_entry(pattern) && wildcard_match(pattern, domain) {
                trace!(domain, pattern, "blacklist hit");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// In-memory blacklist.
#[derive(Default)]
pub struct PatternList {
    patterns: RwLock<Vec<String>>,
}

impl PatternList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| is_entry(p))
            .collect();
        Self {
            patterns: RwLock::new(patterns),
        }
    }

    pub fn add(&self, pattern: &str) -> Result<(), BlacklistError> {
        if !valid_pattern(pattern) {
            return Err(BlacklistError::InvalidPattern(pattern.to_string()));
        }
        self.patterns.write().push(pattern.to_string());
        Ok(())
    }

    pub fn remove(&self, pattern: &str) -> Result<(), BlacklistError> {
        let mut patterns = self.patterns.write();
        let before = patterns.len();
        patterns.retain(|p| p != pattern);
        if patterns.len() == before {
            return Err(BlacklistError::NotFound(pattern.to_string()));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Blacklist for PatternList {
    fn is_blocked(&self, domain: &str) -> Result<bool, BlacklistError> {
        Ok(self
            .patterns
            .read()
            .iter()
            .any(|pattern| wildcard_match(pattern, domain)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn blacklist_with(lines: &str) -> (TempDir, FileBlacklist) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.txt");
        fs::write(&path, lines).unwrap();
        (dir, FileBlacklist::new(path))
    }

    #[test]
    fn is_blocked_matches_file_patterns() {
        let (_dir, blacklist) = blacklist_with("*.ads.example.com\r\ntracker.net\n");

        assert!(blacklist.is_blocked("track.ads.example.com").unwrap());
        assert!(blacklist.is_blocked("tracker.net").unwrap());
        assert!(!blacklist.is_blocked("example.com").unwrap());
    }

    #[test]
    fn is_blocked_skips_blank_and_comment_lines() {
        let (_dir, blacklist) = blacklist_with("# ads\n\n*.ads.com\n");

        assert!(!blacklist.is_blocked("").unwrap());
        assert!(!blacklist.is_blocked("# ads").unwrap());
        assert!(blacklist.is_blocked("x.ads.com").unwrap());
    }

    #[test]
    fn missing_file_blocks_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let blacklist = FileBlacklist::new(dir.path().join("absent.txt"));

        assert!(!blacklist.is_blocked("ads.example.com").unwrap());
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a pattern file.
        let blacklist = FileBlacklist::new(dir.path());

        assert!(blacklist.is_blocked("ads.example.com").is_err());
    }

    #[test]
    fn add_appends_and_applies_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let blacklist = FileBlacklist::new(dir.path().join("blacklist.txt"));

        blacklist.add("*.doubleclick.net").unwrap();
        blacklist.add("ads?.example.com").unwrap();

        assert!(blacklist.is_blocked("ad.doubleclick.net").unwrap());
        assert!(blacklist.is_blocked("ads1.example.com").unwrap());
        assert_eq!(
            blacklist.patterns().unwrap(),
            ["*.doubleclick.net", "ads?.example.com"]
        );
    }

    #[test]
    fn add_rejects_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let blacklist = FileBlacklist::new(dir.path().join("blacklist.txt"));

        assert!(matches!(
            blacklist.add("not valid"),
            Err(BlacklistError::InvalidPattern(_))
        ));
    }

    #[test]
    fn remove_drops_pattern() {
        let (_dir, blacklist) = blacklist_with("a.com\nb.com\na.com\n");

        blacklist.remove("a.com").unwrap();

        assert_eq!(blacklist.patterns().unwrap(), ["b.com"]);
        assert!(!blacklist.is_blocked("a.com").unwrap());
    }

    #[test]
    fn remove_reports_missing_pattern() {
        let (_dir, blacklist) = blacklist_with("a.com\n");

        assert!(matches!(
            blacklist.remove("b.com"),
            Err(BlacklistError::NotFound(_))
        ));
    }

    #[test]
    fn pattern_list_add_and_remove() {
        let list = PatternList::new(["*.ads.com"]);
        assert!(list.is_blocked("x.ads.com").unwrap());

        list.add("tracker.io").unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.is_blocked("tracker.io").unwrap());

        list.remove("*.ads.com").unwrap();
        assert!(!list.is_blocked("x.ads.com").unwrap());
        assert!(list.remove("*.ads.com").is_err());
    }

    #[test]
    fn pattern_list_ignores_blank_entries() {
        let list = PatternList::new(["", "# comment", "a.com"]);

        assert_eq!(list.len(), 1);
        assert!(!list.is_blocked("").unwrap());
    }
}
