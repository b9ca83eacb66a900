//! Reflector tuning knobs.

use serde::{Deserialize, Serialize};

/// Configuration for [`Reflector`](crate::Reflector).
///
/// Margins are in content units along the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectorConfig {
    /// Content kept buffered above and below the viewport.
    pub buffer_margin: u32,
    /// Extra content loaded on the leading edge while scrolling.
    pub read_ahead: u32,
    /// Horizontal offset per depth level.
    pub indent: u32,
    /// Run full tree validation after every mutation.
    pub validate_after_mutation: bool,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            buffer_margin: 32,
            read_ahead: 64,
            indent: 2,
            validate_after_mutation: cfg!(debug_assertions),
        }
    }
}

impl ReflectorConfig {
    #[must_use]
    pub const fn with_buffer_margin(mut self, margin: u32) -> Self {
        self.buffer_margin = margin;
        self
    }

    #[must_use]
    pub const fn with_read_ahead(mut self, read_ahead: u32) -> Self {
        self.read_ahead = read_ahead;
        self
    }

    #[must_use]
    pub const fn with_indent(mut self, indent: u32) -> Self {
        self.indent = indent;
        self
    }

    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_after_mutation = enabled;
        self
    }

    /// Defaults overridden by `PARTREE_*` environment variables.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u32>().ok());
        if let Some(margin) = number("PARTREE_BUFFER_MARGIN") {
            self.buffer_margin = margin;
        }
        if let Some(read_ahead) = number("PARTREE_READ_AHEAD") {
            self.read_ahead = read_ahead;
        }
        if let Some(indent) = number("PARTREE_INDENT") {
            self.indent = indent;
        }
        if let Some(flag) = lookup("PARTREE_VALIDATE") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.validate_after_mutation = true,
                "0" | "false" | "no" | "off" => self.validate_after_mutation = false,
                _ => {}
            }
        }
        self
    }
}
