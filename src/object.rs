//! Parses a single relocatable object's text stream into an in-memory
//! [`Module`] record (name, areas, symbols); the raw content is retained
//! for the relocation applier's second pass.
//!
//! Each line starts with a single-letter record type followed by
//! whitespace-separated fields. Recognised types: `XL2` (magic, required
//! first non-empty record), `M <name>`, `A <name> size <hex> flags <dec>
//! addr <hex>`, `S <name> Def|Ref<hex>`, `T ...`/`R ...` (recognised here,
//! interpreted by the relocation applier), `O`/`H` (skipped). Any other
//! non-empty record type is fatal, as is an unknown area name with
//! non-zero size.

use crate::error::{Error, Result};
use crate::module::{Area, AreaKind, KNOWN_AREAS, Module, Symbol, SymbolKind};

fn hex_plain(field: &str) -> Result<u32> {
    u32::from_str_radix(field, 16)
        .map_err(|_| Error::format(format!("expected a hexadecimal value, found `{field}`")))
}

/// Parse a module from its retained text content.
pub fn parse_object(filename: &str, content: String) -> Result<Module> {
    let mut module = Module::new(filename.to_string());
    module.content = content;

    let mut saw_magic = false;
    let mut explicit_name = false;

    for line in module.content.clone().lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&record_type) = fields.first() else {
            continue;
        };

        if !saw_magic && record_type != "XL2" {
            return Err(Error::format(format!(
                "{filename} must start with the XL2 magic record"
            )));
        }

        match record_type {
            "XL2" => {
                saw_magic = true;
            }
            "M" => {
                let name = fields.get(1).ok_or_else(|| {
                    Error::format(format!("M record in {filename} is missing a name"))
                })?;
                module.name = (*name).to_string();
                explicit_name = true;
            }
            "O" | "H" => {}
            "S" => parse_symbol(&mut module, filename, &fields)?,
            "A" => parse_area(&mut module, filename, &fields)?,
            "T" | "R" => {}
            "" => {}
            other => {
                return Err(Error::format(format!(
                    "unrecognized record type `{other}` in {filename}"
                )))
            }
        }
    }

    if !saw_magic {
        return Err(Error::format(format!(
            "{filename} is missing the XL2 magic record"
        )));
    }

    if !explicit_name {
        module.name = infer_name(filename, &module)?;
    }

    Ok(module)
}

fn parse_symbol(module: &mut Module, filename: &str, fields: &[&str]) -> Result<()> {
    let name = fields
        .get(1)
        .ok_or_else(|| Error::format(format!("S record in {filename} is missing a name")))?;

    // The `Def`/`Ref` literal and the hex address may or may not be
    // separated by whitespace in the source object; normalize by
    // concatenating every field after the name before splitting it back up.
    let rest: String = fields[2..].concat();
    if rest.len() < 3 {
        return Err(Error::format(format!(
            "S record for {name} in {filename} is missing Def/Ref"
        )));
    }
    let (kind_str, addr_str) = rest.split_at(3);
    let kind = match kind_str {
        "Def" => SymbolKind::Def,
        "Ref" => SymbolKind::Ref,
        other => {
            return Err(Error::format(format!(
                "symbol {name} in {filename} has unexpected kind `{other}`"
            )))
        }
    };
    let addr = hex_plain(addr_str)?;

    let area_name = module
        .areas
        .last()
        .map(|a| a.name.clone())
        .unwrap_or_default();

    module.symbols.push(Symbol {
        name: (*name).to_string(),
        addr,
        kind,
        area_name,
        absolute_address: None,
    });
    Ok(())
}

fn parse_area(module: &mut Module, filename: &str, fields: &[&str]) -> Result<()> {
    let raw_name = fields
        .get(1)
        .ok_or_else(|| Error::format(format!("A record in {filename} is missing a name")))?;
    if fields.get(2) != Some(&"size") {
        return Err(Error::format(format!(
            "A record for {raw_name} in {filename} is missing `size`"
        )));
    }
    let size = hex_plain(fields.get(3).ok_or_else(|| {
        Error::format(format!("A record for {raw_name} in {filename} is missing a size value"))
    })?)?;
    if fields.get(4) != Some(&"flags") {
        return Err(Error::format(format!(
            "A record for {raw_name} in {filename} is missing `flags`"
        )));
    }
    let flags: u32 = fields
        .get(5)
        .ok_or_else(|| Error::format(format!("A record for {raw_name} in {filename} is missing a flags value")))?
        .parse()
        .map_err(|_| Error::format(format!("A record for {raw_name} in {filename} has a non-decimal flags value")))?;
    if fields.get(6) != Some(&"addr") {
        return Err(Error::format(format!(
            "A record for {raw_name} in {filename} is missing `addr`"
        )));
    }
    let addr = hex_plain(fields.get(7).ok_or_else(|| {
        Error::format(format!("A record for {raw_name} in {filename} is missing an addr value"))
    })?)?;

    let kind = match flags {
        0 => AreaKind::Relative,
        8 => AreaKind::Absolute,
        other => {
            return Err(Error::format(format!(
                "A record for {raw_name} in {filename} has unexpected flags {other}"
            )))
        }
    };

    let name = if raw_name.starts_with('_') {
        raw_name.to_string()
    } else {
        format!("_{raw_name}")
    };

    if size > 0 && !KNOWN_AREAS.contains(&name.as_str()) {
        return Err(Error::format(format!(
            "area {name} in {filename} is unknown"
        )));
    }

    if name == "_HEADER0" {
        module.enabled = true;
    }

    module.areas.push(Area::new(name, size, kind, addr));
    Ok(())
}

/// Infer a module's name when no explicit `M` record is present.
fn infer_name(filename: &str, module: &Module) -> Result<String> {
    if let Some(stem) = filename.strip_suffix(".rel") {
        let stem = stem.rsplit(['/', '\\']).next().unwrap_or(stem);
        return Ok(stem.replace('.', "_"));
    }

    for symbol in &module.symbols {
        if symbol.kind == SymbolKind::Def && symbol.name.starts_with('_') {
            return Ok(symbol.name[1..].to_string());
        }
    }

    Err(Error::naming(format!(
        "could not infer a module name for {filename}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_object() -> String {
        "XL2\n\
         M hello\n\
         A _HEADER0 size 0040 flags 8 addr 4000\n\
         A _CODE size 0100 flags 0 addr 0000\n\
         A _DATA size 0010 flags 0 addr 0000\n\
         S ___ML_CONFIG_RAM_START Def0000\n\
         S _main Def0000\n"
            .to_string()
    }

    #[test]
    fn parses_explicit_name_and_areas() {
        let module = parse_object("hello.rel", hello_object()).unwrap();
        assert_eq!(module.name, "hello");
        assert!(module.enabled);
        assert_eq!(module.areas.len(), 3);
        assert_eq!(module.areas[0].name, "_HEADER0");
        assert_eq!(module.areas[0].kind, AreaKind::Absolute);
        assert_eq!(module.areas[1].kind, AreaKind::Relative);
        assert_eq!(module.symbols.len(), 2);
        assert_eq!(module.symbols[1].area_name, "_DATA");
    }

    #[test]
    fn infers_name_from_filename() {
        let content = "XL2\nA _HEADER0 size 0001 flags 8 addr 4000\n".to_string();
        let module = parse_object("sub/my.mod.rel", content).unwrap();
        assert_eq!(module.name, "my_mod");
    }

    #[test]
    fn infers_name_from_first_def() {
        let content = "XL2\nS _foo Def0000\n".to_string();
        let module = parse_object("anonymous.obj", content).unwrap();
        assert_eq!(module.name, "foo");
    }

    #[test]
    fn unknown_area_is_fatal() {
        let content = "XL2\nA _BOGUS size 0002 flags 0 addr 0000\n".to_string();
        assert!(parse_object("a.rel", content).is_err());
    }

    #[test]
    fn unknown_record_is_fatal() {
        let content = "XL2\nZ whatever\n".to_string();
        assert!(parse_object("a.rel", content).is_err());
    }

    #[test]
    fn missing_magic_is_fatal() {
        let content = "M hello\n".to_string();
        assert!(parse_object("a.rel", content).is_err());
    }
}
