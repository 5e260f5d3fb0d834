//! Output & reports (C8): writes the ROM image and the two tabular map files.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::module::ModuleStore;

/// Write the ROM byte vector to `path`.
pub fn write_rom(path: &Path, rom: &[u8]) -> Result<()> {
    fs::write(path, rom)?;
    Ok(())
}

/// Write `<rom>.areas.map`: one row per area.
pub fn write_areas_map(path: &Path, store: &ModuleStore) -> Result<()> {
    let mut out = String::new();
    writeln!(out, "{:<24} {:<10} {:>4} {:>6} {:>6} {:>6} {:>10} {:<5}",
        "module", "area", "seg", "page", "addr", "size", "rom_addr", "kind")
        .unwrap();
    for group in store.values() {
        for module in group {
            if !module.enabled {
                continue;
            }
            for area in &module.areas {
                let page = module
                    .page
                    .map(|p| ((b'A' + p) as char).to_string())
                    .unwrap_or_else(|| "-".to_string());
                let rom_addr = area
                    .rom_addr
                    .map(|a| format!("0x{a:04X}"))
                    .unwrap_or_else(|| "-----".to_string());
                writeln!(
                    out,
                    "{:<24} {:<10} {:>4} {:>6} 0x{:04X} 0x{:04X} {:>10} {:<5}",
                    module.name,
                    area.name,
                    module.segment,
                    page,
                    area.addr,
                    area.size,
                    rom_addr,
                    format!("{:?}", area.kind),
                )
                .unwrap();
            }
        }
    }
    fs::write(path, out)?;
    Ok(())
}

/// Write `<rom>.symbols.map`: one row per `Def` symbol.
pub fn write_symbols_map(path: &Path, store: &ModuleStore) -> Result<()> {
    let mut out = String::new();
    writeln!(out, "{:<32} {:<24} {:<10} {:>10}", "symbol", "module", "area", "addr").unwrap();
    for group in store.values() {
        for module in group {
            if !module.enabled {
                continue;
            }
            for symbol in &module.symbols {
                if symbol.kind != crate::module::SymbolKind::Def {
                    continue;
                }
                let addr = symbol
                    .absolute_address
                    .map(|a| format!("0x{a:04X}"))
                    .unwrap_or_else(|| "-----".to_string());
                writeln!(
                    out,
                    "{:<32} {:<24} {:<10} {:>10}",
                    symbol.name, module.name, symbol.area_name, addr
                )
                .unwrap();
            }
        }
    }
    fs::write(path, out)?;
    Ok(())
}

/// Derive `<rom>.areas.map` / `<rom>.symbols.map` paths from the ROM output path.
pub fn map_paths(rom_path: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let mut areas = rom_path.as_os_str().to_owned();
    areas.push(".areas.map");
    let mut symbols = rom_path.as_os_str().to_owned();
    symbols.push(".symbols.map");
    (areas.into(), symbols.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_paths_append_suffixes() {
        let (areas, symbols) = map_paths(Path::new("out.rom"));
        assert_eq!(areas, Path::new("out.rom.areas.map"));
        assert_eq!(symbols, Path::new("out.rom.symbols.map"));
    }
}
