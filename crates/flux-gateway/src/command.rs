//! Classification of trimmed command lines.

pub const UPLOAD_PREFIX: &str = "UPLOAD:";
pub const DOWNLOAD_PREFIX: &str = "DOWNLOAD:";

/// What a client line asks the gateway to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Publish the line to the bus.
    Relay(String),
    /// Store the next block under `name`.
    Upload { name: String },
    /// Write the blob stored under `name` back to the client.
    Download { name: String },
}

impl Command {
    /// Classify a line. Matching is by exact, case-sensitive prefix; anything
    /// else (including lines that merely contain a prefix) is relayed.
    ///
    /// Whitespace between the prefix and the name is not part of the name, so
    /// `UPLOAD: a` and `UPLOAD:a` address the same blob.
    pub fn parse(line: &str) -> Self {
        if let Some(rest) = line.strip_prefix(UPLOAD_PREFIX) {
            Self::Upload {
                name: rest.trim().to_string(),
            }
        } else if let Some(rest) = line.strip_prefix(DOWNLOAD_PREFIX) {
            Self::Download {
                name: rest.trim().to_string(),
            }
        } else {
            Self::Relay(line.to_string())
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Relay(_) => "relay",
            Self::Upload { .. } => "upload",
            Self::Download { .. } => "download",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_relay() {
        assert_eq!(Command::parse("hello"), Command::Relay("hello".into()));
    }

    #[test]
    fn upload_and_download_prefixes() {
        assert_eq!(
            Command::parse("UPLOAD:a.txt"),
            Command::Upload {
                name: "a.txt".into()
            }
        );
        assert_eq!(
            Command::parse("DOWNLOAD:a.txt"),
            Command::Download {
                name: "a.txt".into()
            }
        );
    }

    #[test]
    fn prefix_must_lead_the_line() {
        assert_eq!(
            Command::parse("please UPLOAD:a.txt"),
            Command::Relay("please UPLOAD:a.txt".into())
        );
        assert_eq!(
            Command::parse("xDOWNLOAD:b"),
            Command::Relay("xDOWNLOAD:b".into())
        );
    }

    #[test]
    fn prefix_is_case_sensitive() {
        assert_eq!(
            Command::parse("upload:a.txt"),
            Command::Relay("upload:a.txt".into())
        );
    }

    #[test]
    fn name_is_trimmed_and_may_be_empty() {
        assert_eq!(
            Command::parse("UPLOAD:  spaced name "),
            Command::Upload {
                name: "spaced name".into()
            }
        );
        assert_eq!(
            Command::parse("DOWNLOAD:"),
            Command::Download { name: String::new() }
        );
    }

    #[test]
    fn space_after_prefix_addresses_the_same_blob() {
        assert_eq!(Command::parse("UPLOAD: a"), Command::parse("UPLOAD:a"));
        assert_eq!(Command::parse("DOWNLOAD:\ta"), Command::parse("DOWNLOAD:a"));
    }

    #[test]
    fn name_may_contain_colons() {
        assert_eq!(
            Command::parse("DOWNLOAD:dir:file"),
            Command::Download {
                name: "dir:file".into()
            }
        );
        assert_eq!(Command::parse("DOWNLOAD:dir:file").kind(), "download");
    }
}
