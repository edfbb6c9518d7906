//! Action name conversion
//!
//! Operation names written in `SCREAMING_SNAKE` style are turned into the
//! lower-camel tags used as wire-level action types:
//!
//! ```
//! use statewire_core::name::{convert_action_name, ConvertOptions};
//!
//! assert_eq!(convert_action_name("FETCH_APPS", ConvertOptions::default()), "fetchApps");
//! assert_eq!(convert_action_name("FETCH_APPS", ConvertOptions::preserve_rest()), "fetchAPPS");
//! // Already camel-cased names pass through untouched
//! assert_eq!(convert_action_name("fetchApps", ConvertOptions::default()), "fetchApps");
//! ```

/// Options for [`convert_action_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Lower-case everything after the first character of each segment
    pub lower_rest: bool,
}

impl ConvertOptions {
    /// Keep the remainder of every segment as written (`FETCH_APPS` → `fetchAPPS`)
    #[must_use]
    pub const fn preserve_rest() -> Self {
        Self { lower_rest: false }
    }
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self { lower_rest: true }
    }
}

/// Whether `name` consists only of uppercase ASCII letters and underscores.
#[must_use]
pub fn should_convert(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b == b'_' || b.is_ascii_uppercase())
}

/// Convert an action name into its lower-camel wire tag.
///
/// Names that do not match [`should_convert`] are returned unchanged.
#[must_use]
pub fn convert_action_name(name: &str, options: ConvertOptions) -> String {
    if !should_convert(name) {
        return name.to_string();
    }

    let mut parts = name.split('_');
    let mut converted = parts.next().unwrap_or_default().to_ascii_lowercase();

    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            converted.push(first.to_ascii_uppercase());
            let rest = chars.as_str();
            if options.lower_rest {
                converted.push_str(&rest.to_ascii_lowercase());
            } else {
                converted.push_str(rest);
            }
        }
    }

    converted
}
