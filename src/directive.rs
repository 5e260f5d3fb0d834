//! Classification of linker-directive symbol names.
//!
//! This is a pure function over a symbol's name (and, for move-to and
//! segment-request directives, its `Def`/`Ref` kind); it holds no state and
//! touches no module store.

use crate::error::{Error, Result};
use crate::module::SymbolKind;

const CONFIG_PREFIX: &str = "___ML_CONFIG_";
const SEGMENT_PREFIX: &str = "___ML_SEGMENT_";
const MOVE_PREFIX: &str = "___ML_MOVE_SYMBOLS_TO_";
const MOVE_INFIX: &str = "_FROM_";

/// The classification of a symbol name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Any name that isn't a recognised linker directive.
    Ordinary,
    /// `___ML_CONFIG_<KEY>` — a configuration constant.
    Configuration { key: String },
    /// `___ML_SEGMENT_<P>_<MODULE>` — a request to load `<MODULE>`'s segment
    /// into page `<P>`.
    SegmentRequest { module: String, page: u8 },
    /// `___ML_MOVE_SYMBOLS_TO_<TARGET>_FROM_<SOURCE>` — relink `<SOURCE>`'s
    /// symbols under `<TARGET>`.
    MoveTo { target: String, source: String },
}

/// Classify `name`. `kind` is required because segment-request and move-to
/// directives are only legal on one side (`Ref` and `Def` respectively).
pub fn classify(name: &str, kind: SymbolKind) -> Result<Directive> {
    if let Some(rest) = name.strip_prefix(CONFIG_PREFIX) {
        return Ok(Directive::Configuration {
            key: rest.to_string(),
        });
    }

    if let Some(rest) = name.strip_prefix(SEGMENT_PREFIX) {
        if kind != SymbolKind::Ref {
            return Err(Error::naming(format!(
                "segment-request symbol {name} must be a Ref"
            )));
        }
        let mut chars = rest.chars();
        let page_letter = chars
            .next()
            .ok_or_else(|| Error::naming(format!("malformed segment-request symbol {name}")))?;
        let page = match page_letter {
            'A'..='D' => page_letter as u8 - b'A',
            _ => {
                return Err(Error::naming(format!(
                    "segment-request symbol {name} has an invalid page letter"
                )))
            }
        };
        let rest = chars.as_str();
        let module = rest.strip_prefix('_').ok_or_else(|| {
            Error::naming(format!(
                "segment-request symbol {name} is missing the separator underscore"
            ))
        })?;
        if module.is_empty() {
            return Err(Error::naming(format!(
                "segment-request symbol {name} has no target module"
            )));
        }
        return Ok(Directive::SegmentRequest {
            module: module.to_string(),
            page,
        });
    }

    if let Some(rest) = name.strip_prefix(MOVE_PREFIX) {
        if kind != SymbolKind::Def {
            return Err(Error::naming(format!(
                "move-to symbol {name} must be a Def"
            )));
        }
        let occurrences = rest.matches(MOVE_INFIX).count();
        if occurrences != 1 {
            return Err(Error::naming(format!(
                "move-to symbol {name} must contain exactly one {MOVE_INFIX}"
            )));
        }
        let (target, source) = rest.split_once(MOVE_INFIX).unwrap();
        if target.is_empty() || source.is_empty() {
            return Err(Error::naming(format!(
                "move-to symbol {name} has an empty target or source module"
            )));
        }
        return Ok(Directive::MoveTo {
            target: target.to_string(),
            source: source.to_string(),
        });
    }

    Ok(Directive::Ordinary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary() {
        assert_eq!(
            classify("main", SymbolKind::Def).unwrap(),
            Directive::Ordinary
        );
    }

    #[test]
    fn configuration() {
        assert_eq!(
            classify("___ML_CONFIG_RAM_START", SymbolKind::Def).unwrap(),
            Directive::Configuration {
                key: "RAM_START".to_string()
            }
        );
    }

    #[test]
    fn segment_request() {
        assert_eq!(
            classify("___ML_SEGMENT_B_aux", SymbolKind::Ref).unwrap(),
            Directive::SegmentRequest {
                module: "aux".to_string(),
                page: 1,
            }
        );
    }

    #[test]
    fn segment_request_wrong_kind() {
        assert!(classify("___ML_SEGMENT_B_aux", SymbolKind::Def).is_err());
    }

    #[test]
    fn segment_request_bad_page() {
        assert!(classify("___ML_SEGMENT_Z_aux", SymbolKind::Ref).is_err());
    }

    #[test]
    fn move_to() {
        assert_eq!(
            classify(
                "___ML_MOVE_SYMBOLS_TO_host_FROM_helper",
                SymbolKind::Def
            )
            .unwrap(),
            Directive::MoveTo {
                target: "host".to_string(),
                source: "helper".to_string(),
            }
        );
    }

    #[test]
    fn move_to_wrong_kind() {
        assert!(classify("___ML_MOVE_SYMBOLS_TO_host_FROM_helper", SymbolKind::Ref).is_err());
    }

    #[test]
    fn move_to_multiple_from() {
        assert!(classify(
            "___ML_MOVE_SYMBOLS_TO_host_FROM_helper_FROM_other",
            SymbolKind::Def
        )
        .is_err());
    }
}
