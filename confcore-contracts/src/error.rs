//! The `(category, errno, message)` error triple from spec.md §7, plus an
//! optional structured NETCONF diagnostic.

use thiserror::Error;

/// One of the wire-visible error categories enumerated in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Cfg,
    Unix,
    Db,
    Xml,
    Yang,
    Plugin,
    Proto,
    Netconf,
    Events,
    Fatal,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cfg => "cfg",
            Category::Unix => "unix",
            Category::Db => "db",
            Category::Xml => "xml",
            Category::Yang => "yang",
            Category::Plugin => "plugin",
            Category::Proto => "proto",
            Category::Netconf => "netconf",
            Category::Events => "events",
            Category::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured NETCONF `<rpc-error>` diagnostic body, carried alongside a
/// [`ConfcoreError`] when the error must be surfaced to a requester rather
/// than just logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetconfDiagnostic {
    pub error_type: String,
    pub error_tag: String,
    pub error_message: String,
}

#[derive(Error, Debug)]
pub enum ConfcoreError {
    #[error("[{category}] {message}")]
    Categorized {
        category: Category,
        errno: Option<i32>,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfcoreError {
    pub fn new(category: Category, message: impl Into<String>) -> Self {
        Self::Categorized { category, errno: None, message: message.into() }
    }

    pub fn with_errno(category: Category, errno: i32, message: impl Into<String>) -> Self {
        Self::Categorized { category, errno: Some(errno), message: message.into() }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::Categorized { category, .. } => *category,
            Self::Io(_) => Category::Unix,
            Self::Json(_) => Category::Xml,
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Categorized { errno, .. } => *errno,
            Self::Io(e) => e.raw_os_error(),
            Self::Json(_) => None,
        }
    }

    pub fn netconf_diagnostic(&self) -> NetconfDiagnostic {
        let (error_type, error_tag) = match self.category() {
            Category::Xml | Category::Yang => ("protocol", "invalid-value"),
            Category::Db => ("application", "operation-failed"),
            Category::Proto | Category::Netconf => ("rpc", "operation-failed"),
            _ => ("application", "operation-failed"),
        };
        NetconfDiagnostic {
            error_type: error_type.to_string(),
            error_tag: error_tag.to_string(),
            error_message: self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfcoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorized_error_reports_its_own_category() {
        let err = ConfcoreError::with_errno(Category::Db, 17, "create of existing node");
        assert_eq!(err.category(), Category::Db);
        assert_eq!(err.errno(), Some(17));
        assert_eq!(err.to_string(), "[db] create of existing node");
    }

    #[test]
    fn io_error_maps_to_unix_category() {
        let err: ConfcoreError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.category(), Category::Unix);
    }

    #[test]
    fn netconf_diagnostic_picks_protocol_tag_for_xml() {
        let err = ConfcoreError::new(Category::Xml, "malformed body");
        let diag = err.netconf_diagnostic();
        assert_eq!(diag.error_type, "protocol");
        assert_eq!(diag.error_tag, "invalid-value");
    }
}
