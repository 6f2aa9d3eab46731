//! Capture targets and where they come from.

use crate::{CaptureError, ConfigError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use url::{Host, Url};

/// Byte budget for the readable part of a stem. With the digest suffix and an
/// extension the file name stays well under the usual 255-byte limit.
const MAX_STEM_BYTES: usize = 200;

/// One URL or bare host to capture, exactly as the user supplied it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute URL for the browser. Bare hosts are treated as `http://`.
    pub fn url(&self) -> Result<Url, CaptureError> {
        let raw = self.0.trim();
        let candidate = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        Url::parse(&candidate).map_err(|e| CaptureError::InvalidTarget(format!("{raw}: {e}")))
    }

    /// Host part used for DNS resolution, without IPv6 brackets.
    pub fn host(&self) -> Option<String> {
        let url = self.url().ok()?;
        match url.host()? {
            Host::Domain(domain) => Some(domain.to_string()),
            Host::Ipv4(ip) => Some(ip.to_string()),
            Host::Ipv6(ip) => Some(ip.to_string()),
        }
    }

    /// Filesystem-safe name for this target's artifacts, e.g.
    /// `http.example.com_login_3f2a9c1e`.
    ///
    /// The readable part is cut to `MAX_STEM_BYTES` on a character boundary
    /// and always followed by a digest of the raw target, so two targets
    /// never share a stem.
    pub fn file_stem(&self) -> String {
        let raw = self.0.trim();
        let mut readable: String = raw
            .replacen("://", ".", 1)
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '&' | '=' | '#' | ' ' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();

        if readable.len() > MAX_STEM_BYTES {
            let mut cut = MAX_STEM_BYTES;
            while !readable.is_char_boundary(cut) {
                cut -= 1;
            }
            readable.truncate(cut);
        }
        let readable = readable.trim_matches(|c| c == '_' || c == '.');
        let readable = if readable.is_empty() { "target" } else { readable };

        let digest = Sha256::digest(raw.as_bytes());
        format!("{}_{}", readable, hex::encode(&digest[..4]))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Input locations: a line-separated file, a single extra target, or both.
#[derive(Debug, Clone, Default)]
pub struct TargetSource {
    pub file: Option<PathBuf>,
    pub single: Option<String>,
}

impl TargetSource {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file.is_none() && self.single.is_none() {
            return Err(ConfigError::MissingInput);
        }

        if let Some(file) = &self.file {
            if !file.is_file() {
                return Err(ConfigError::InputFileNotFound(file.display().to_string()));
            }
        }

        Ok(())
    }

    /// Read every target, file lines first, then the single target.
    ///
    /// Blank lines and `#` comments in the file are skipped.
    pub async fn load(&self) -> Result<Vec<Target>, CaptureError> {
        let mut targets = Vec::new();

        if let Some(file) = &self.file {
            let content = tokio::fs::read_to_string(file).await?;
            targets.extend(parse_target_lines(&content));
        }

        if let Some(single) = &self.single {
            targets.push(Target::new(single.trim()));
        }

        Ok(targets)
    }
}

pub fn parse_target_lines(content: &str) -> Vec<Target> {
    content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Target::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_url_normalisation() {
        assert_eq!(Target::from("example.com").url().unwrap().as_str(), "http://example.com/");
        assert_eq!(
            Target::from("https://example.com:8443/login").url().unwrap().as_str(),
            "https://example.com:8443/login"
        );
        assert!(Target::from("http://").url().is_err());
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(Target::from("https://sub.example.com/x").host(), Some("sub.example.com".to_string()));
        assert_eq!(Target::from("10.1.2.3:8080").host(), Some("10.1.2.3".to_string()));
        assert_eq!(Target::from("http://[::1]:80/").host(), Some("::1".to_string()));
        assert_eq!(Target::from("http://").host(), None);
    }

    fn readable_part(stem: &str) -> &str {
        let (readable, digest) = stem.rsplit_once('_').unwrap();
        assert_eq!(digest.len(), 8);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        readable
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(readable_part(&Target::from("http://example.com").file_stem()), "http.example.com");
        assert_eq!(
            readable_part(&Target::from("https://example.com:8443/a/b?x=1&y=2").file_stem()),
            "https.example.com_8443_a_b_x_1_y_2"
        );
        assert_eq!(readable_part(&Target::from("example.com/").file_stem()), "example.com");
        assert_eq!(readable_part(&Target::from("///").file_stem()), "target");
        assert_eq!(
            Target::from("http://example.com").file_stem(),
            Target::from("  http://example.com ").file_stem()
        );
    }

    #[test]
    fn test_distinct_targets_get_distinct_stems() {
        let pairs = [
            ("http://x.com", "http://x.com/"),
            ("http://example.com/a?b", "http://example.com/a/b"),
            ("http://example.com/a&b", "http://example.com/a=b"),
        ];
        for (a, b) in pairs {
            assert_ne!(Target::from(a).file_stem(), Target::from(b).file_stem(), "{a} vs {b}");
        }
    }

    #[test]
    fn test_long_non_ascii_stem_fits_a_file_name() {
        let target = Target::new(format!("http://example.com/{}", "é".repeat(300)));
        let stem = target.file_stem();
        let file_name = format!("{stem}.png");
        assert!(file_name.len() <= 255, "{} bytes", file_name.len());
        assert!(readable_part(&stem).len() <= MAX_STEM_BYTES);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(file_name), b"png").unwrap();
    }

    #[test]
    fn test_stem_strips_path_separators() {
        let stem = Target::from("http://h/..\\x:y*z|w").file_stem();
        assert!(!stem.contains(&['/', '\\', ':', '*', '|'][..]));
    }

    #[test]
    fn test_parse_target_lines() {
        let targets = parse_target_lines("http://a.com\n\n  b.com  \n# comment\r\nc.com\n");
        assert_eq!(targets, vec![Target::from("http://a.com"), Target::from("b.com"), Target::from("c.com")]);
    }

    #[test]
    fn test_source_validation() {
        assert_eq!(TargetSource::default().validate(), Err(ConfigError::MissingInput));

        let missing = TargetSource {
            file: Some(PathBuf::from("/definitely/not/here.txt")),
            single: None,
        };
        assert!(matches!(missing.validate(), Err(ConfigError::InputFileNotFound(_))));

        let single = TargetSource {
            file: None,
            single: Some("example.com".to_string()),
        };
        assert!(single.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_file_then_single() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http://one.example").unwrap();
        writeln!(file, "two.example").unwrap();

        let source = TargetSource {
            file: Some(file.path().to_path_buf()),
            single: Some("three.example".to_string()),
        };
        assert!(source.validate().is_ok());

        let targets = source.load().await.unwrap();
        assert_eq!(
            targets,
            vec![
                Target::from("http://one.example"),
                Target::from("two.example"),
                Target::from("three.example"),
            ]
        );
    }
}
