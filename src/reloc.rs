//! Relocation applier (§4.7): the second pass over each enabled module's
//! retained object text, patching resolved addresses into the ROM image.
//!
//! `T` records stage raw bytes at a 16-bit offset; the `R` record that
//! follows says which area those bytes belong to and lists the relocations
//! to apply to them before they're copied into the ROM buffer.

use std::collections::HashMap;

use crate::directive::{classify, Directive};
use crate::error::{Error, Result};
use crate::module::{ModuleStore, SymbolKind};

const ROM_BASE: u32 = 0x4000;
const CHUNK: usize = 0x2000;

/// WORD/BYTE/AREA-SYM/NORM-PCR/BYT1-BYTX/SIGNED-UNSIGNED/LSB-MSB bitfield.
const SYM_BIT: u8 = 0x02;
const MASK_WORD: u8 = 0x00;
const MASK_BYTE_LSB: u8 = 0x09;
const MASK_BYTE_MSB: u8 = 0x89;

fn hex_byte(field: &str) -> Result<u8> {
    u8::from_str_radix(field, 16)
        .map_err(|_| Error::format(format!("expected a two-digit hex byte, found `{field}`")))
}

struct Resolver<'a> {
    symbol_addr: HashMap<String, u32>,
    module_segment: HashMap<String, u32>,
    module_page: HashMap<String, Option<u8>>,
    config: &'a HashMap<String, u32>,
}

impl<'a> Resolver<'a> {
    fn new(store: &ModuleStore, config: &'a HashMap<String, u32>) -> Self {
        let mut symbol_addr = HashMap::new();
        let mut module_segment = HashMap::new();
        let mut module_page = HashMap::new();
        for (name, group) in store {
            for module in group {
                if !module.enabled {
                    continue;
                }
                module_segment.insert(name.clone(), module.segment);
                module_page.insert(name.clone(), module.page);
                for symbol in &module.symbols {
                    if symbol.kind == SymbolKind::Def {
                        if let Some(addr) = symbol.absolute_address {
                            symbol_addr.insert(symbol.name.clone(), addr);
                        }
                    }
                }
            }
        }
        Resolver {
            symbol_addr,
            module_segment,
            module_page,
            config,
        }
    }

    /// Resolve a `SYM`-flagged relocation entry's symbol name to a value.
    fn resolve_symbol(&self, referencer: &str, referencer_area: &str, name: &str) -> Result<u32> {
        if let Some(&addr) = self.symbol_addr.get(name) {
            return Ok(addr);
        }
        if let Ok(Directive::SegmentRequest { module: target, page }) =
            classify(name, SymbolKind::Ref)
        {
            let segment = *self
                .module_segment
                .get(&target)
                .ok_or_else(|| Error::linkage(format!("module {target} requested by {referencer} is unknown")))?;
            if referencer_area == "_CODE" {
                if let Some(Some(referencer_page)) = self.module_page.get(referencer) {
                    if *referencer_page == page {
                        log::warn!(
                            "{referencer}: requests its own page {page} via {name}, which it cannot satisfy"
                        );
                    }
                }
            }
            return Ok(segment);
        }
        if let Ok(Directive::Configuration { key }) = classify(name, SymbolKind::Def) {
            if let Some(&value) = self.config.get(&key) {
                return Ok(value);
            }
        }
        Err(Error::relocation(format!(
            "{referencer}: undefined symbol `{name}` in relocation"
        )))
    }
}

/// Run C7 over every enabled module, returning the patched ROM bytes
/// (indexed from `ROM_BASE`).
pub fn apply_relocations(store: &ModuleStore, config: &HashMap<String, u32>) -> Result<Vec<u8>> {
    let resolver = Resolver::new(store, config);
    let mut rom: Vec<u8> = vec![0xFF; CHUNK * 4];

    for group in store.values() {
        for module in group {
            if !module.enabled {
                continue;
            }
            apply_module(module, &resolver, &mut rom)?;
        }
    }

    Ok(rom)
}

fn apply_module(
    module: &crate::module::Module,
    resolver: &Resolver,
    rom: &mut Vec<u8>,
) -> Result<()> {
    let mut t_pos: u16 = 0;
    let mut t_buf: Vec<u8> = Vec::new();

    for line in module.content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&record_type) = fields.first() else {
            continue;
        };

        match record_type {
            "T" => {
                if fields.len() < 3 {
                    return Err(Error::format(format!(
                        "T record in {} is missing its offset",
                        module.filename
                    )));
                }
                let lo = hex_byte(fields[1])?;
                let hi = hex_byte(fields[2])?;
                t_pos = u16::from(lo) | (u16::from(hi) << 8);
                t_buf = fields[3..]
                    .iter()
                    .map(|f| hex_byte(f))
                    .collect::<Result<Vec<u8>>>()?;
            }
            "R" => {
                apply_r_record(module, resolver, &fields, t_pos, &mut t_buf, rom)?;
            }
            _ => {}
        }
    }

    Ok(())
}

fn apply_r_record(
    module: &crate::module::Module,
    resolver: &Resolver,
    fields: &[&str],
    t_pos: u16,
    t_buf: &mut Vec<u8>,
    rom: &mut Vec<u8>,
) -> Result<()> {
    if fields.len() < 5 || fields[1] != "00" || fields[2] != "00" {
        return Err(Error::format(format!(
            "R record in {} has an unexpected header",
            module.filename
        )));
    }
    let aa0 = hex_byte(fields[3])?;
    let aa1 = hex_byte(fields[4])?;
    let area_idx = usize::from(aa0) | (usize::from(aa1) << 8);
    let area = module.areas.get(area_idx).ok_or_else(|| {
        Error::relocation(format!(
            "R record in {} references unknown area {area_idx}",
            module.filename
        ))
    })?;

    let mut n2_adjust: i32 = 2;
    for entry in fields[5..].chunks(4) {
        if entry.len() != 4 {
            return Err(Error::format(format!(
                "R record in {} has a truncated relocation entry",
                module.filename
            )));
        }
        let mut n1 = hex_byte(entry[0])?;
        let n2 = hex_byte(entry[1])?;
        let xx0 = hex_byte(entry[2])?;
        let xx1 = hex_byte(entry[3])?;
        let idx = usize::from(xx0) | (usize::from(xx1) << 8);

        let address = if n1 & SYM_BIT != 0 {
            let symbol = module.symbols.get(idx).ok_or_else(|| {
                Error::relocation(format!(
                    "R record in {} references unknown symbol {idx}",
                    module.filename
                ))
            })?;
            n1 &= !SYM_BIT;
            resolver.resolve_symbol(&module.name, &area.name, &symbol.name)?
        } else {
            let referenced = module.areas.get(idx).ok_or_else(|| {
                Error::relocation(format!(
                    "R record in {} references unknown area {idx}",
                    module.filename
                ))
            })?;
            referenced.addr
        };

        let offset = i32::from(n2) - n2_adjust;
        if offset < 0 {
            return Err(Error::relocation(format!(
                "R record in {} has n2 less than the running adjust",
                module.filename
            )));
        }
        let offset = offset as usize;
        if offset + 1 >= t_buf.len() {
            return Err(Error::relocation(format!(
                "R record in {} patches past the end of its data",
                module.filename
            )));
        }
        let base = u16::from(t_buf[offset]) | (u16::from(t_buf[offset + 1]) << 8);
        let value = base.wrapping_add(address as u16);

        match n1 {
            MASK_WORD => {
                t_buf[offset] = (value & 0xFF) as u8;
                t_buf[offset + 1] = (value >> 8) as u8;
            }
            MASK_BYTE_LSB => {
                t_buf[offset] = (value & 0xFF) as u8;
                t_buf.remove(offset + 1);
                n2_adjust += 1;
            }
            MASK_BYTE_MSB => {
                t_buf[offset] = ((value >> 8) & 0xFF) as u8;
                t_buf.remove(offset + 1);
                n2_adjust += 1;
            }
            other => {
                return Err(Error::relocation(format!(
                    "R record in {} has unsupported relocation flags 0x{other:02X}",
                    module.filename
                )))
            }
        }
    }

    if let Some(rom_addr) = area.rom_addr {
        let start = (rom_addr - ROM_BASE) as usize + t_pos as usize;
        let end = start + t_buf.len();
        if end > rom.len() {
            let grown = (end - rom.len()).div_ceil(CHUNK) * CHUNK;
            rom.resize(rom.len() + grown, 0xFF);
        }
        rom[start..end].copy_from_slice(t_buf);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::layout;
    use crate::object::parse_object;
    use crate::resolve::resolve;

    fn link(texts: &[(&str, &str)]) -> (ModuleStore, HashMap<String, u32>) {
        let modules = texts
            .iter()
            .map(|(name, text)| parse_object(name, text.to_string()).unwrap())
            .collect();
        let mut store = resolve(modules).unwrap();
        let layout = layout(&mut store).unwrap();
        (store, layout.config)
    }

    #[test]
    fn word_relocation_writes_absolute_address() {
        let (store, config) = link(&[(
            "main.rel",
            "XL2\n\
             A _HEADER0 size 0002 flags 8 addr 4000\n\
             S ___ML_CONFIG_RAM_START DefC000\n\
             S _main Def0000\n\
             T 00 00 00 00\n\
             R 00 00 00 00 02 02 01 00\n",
        )]);
        let rom = apply_relocations(&store, &config).unwrap();
        let main_addr = store["main"][0]
            .symbols
            .iter()
            .find(|s| s.name == "_main")
            .unwrap()
            .absolute_address
            .unwrap();
        assert_eq!(u16::from_le_bytes([rom[0], rom[1]]), main_addr as u16);
    }

    #[test]
    fn byte_relocation_shrinks_and_adjusts() {
        let (store, config) = link(&[(
            "main.rel",
            "XL2\n\
             A _HEADER0 size 0003 flags 8 addr 4000\n\
             S ___ML_CONFIG_RAM_START DefC000\n\
             T 00 00 00 FF FF\n\
             R 00 00 00 00 09 02 00 00\n",
        )]);
        let rom = apply_relocations(&store, &config).unwrap();
        assert_eq!(rom[0], 0x00);
    }

    #[test]
    fn unresolvable_symbol_is_fatal() {
        let (store, config) = link(&[(
            "main.rel",
            "XL2\n\
             A _HEADER0 size 0002 flags 8 addr 4000\n\
             S ___ML_CONFIG_RAM_START DefC000\n\
             S ___ML_CONFIG_UNDEFINED Ref0000\n\
             T 00 00 00 00\n\
             R 00 00 00 00 02 02 01 00\n",
        )]);
        assert!(apply_relocations(&store, &config).is_err());
    }
}
