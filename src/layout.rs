//! Page & segment allocation (§4.5) and the memory layout engine (§4.6).
//!
//! The two are implemented together because segment packing needs the
//! final `rom_ptr` that the fixed-order layout passes produce, and the
//! published `___ML_CONFIG_*` symbols it leaves behind are read back by
//! later passes and by the relocation applier.

use std::collections::HashMap;

use crate::directive::{classify, Directive};
use crate::error::{Error, Result};
use crate::module::{AreaKind, ModuleStore, SymbolKind};

const SEGMENT_SIZE: u32 = 0x2000;
const MAIN_BASE: u32 = 0x4000;
const MAIN_END: u32 = 0xC000;
const RAM_LIMIT: u32 = 0xF000;

/// The outcome of the memory layout engine: final cursors and the published
/// configuration symbols, keyed by the part of the name after `___ML_CONFIG_`.
#[derive(Debug, Default)]
pub struct Layout {
    pub rom_ptr: u32,
    pub ram_ptr: u32,
    pub config: HashMap<String, u32>,
}

/// Run C5 and C6 over the enabled modules, mutating their areas in place.
pub fn layout(store: &mut ModuleStore) -> Result<Layout> {
    let mut config = collect_config(store)?;
    let ram_start = *config
        .get("RAM_START")
        .ok_or_else(|| Error::linkage("___ML_CONFIG_RAM_START is not defined"))?;

    let mut rom_ptr = MAIN_BASE;
    let mut ram_ptr = ram_start;

    layout_header0(store, &mut rom_ptr)?;
    layout_rom_pass(store, "_GSINIT", &mut rom_ptr)?;
    layout_rom_pass(store, "_GSFINAL", &mut rom_ptr)?;

    config.insert("INIT_ROM_START".to_string(), rom_ptr);
    config.insert("INIT_RAM_START".to_string(), ram_ptr);
    let init_rom_start = rom_ptr;

    layout_home(store, &mut rom_ptr, &mut ram_ptr)?;
    layout_rom_pass(store, "_INITIALIZER", &mut rom_ptr)?;

    config.insert("INIT_SIZE".to_string(), rom_ptr - init_rom_start);

    layout_ram_pass(store, "_INITIALIZED", &mut ram_ptr)?;
    layout_ram_pass(store, "_DATA", &mut ram_ptr)?;
    layout_ram_pass(store, "_XDATA", &mut ram_ptr)?;

    assign_pages(store)?;
    default_unrequested_pages(store);
    pack_code_segments(store, rom_ptr)?;

    resolve_symbol_addresses(store);

    if rom_ptr > MAIN_END {
        return Err(Error::capacity(format!(
            "main region uses {} bytes, over the 32 KiB budget",
            rom_ptr - MAIN_BASE
        )));
    }
    if ram_ptr > RAM_LIMIT {
        return Err(Error::capacity(format!(
            "RAM usage reaches 0x{ram_ptr:04X}, too close to the stack"
        )));
    }

    Ok(Layout {
        rom_ptr,
        ram_ptr,
        config,
    })
}

fn collect_config(store: &ModuleStore) -> Result<HashMap<String, u32>> {
    let mut config = HashMap::new();
    for group in store.values() {
        for module in group {
            if !module.enabled {
                continue;
            }
            for symbol in &module.symbols {
                if symbol.kind != SymbolKind::Def {
                    continue;
                }
                if let Directive::Configuration { key } = classify(&symbol.name, symbol.kind)? {
                    config.insert(key, symbol.addr);
                }
            }
        }
    }
    Ok(config)
}

fn layout_header0(store: &mut ModuleStore, rom_ptr: &mut u32) -> Result<()> {
    let mut found = false;
    for group in store.values_mut() {
        for module in group.iter_mut() {
            if !module.enabled {
                continue;
            }
            for area in module.areas.iter_mut() {
                if area.name != "_HEADER0" {
                    continue;
                }
                if found {
                    return Err(Error::linkage("_HEADER0 is defined more than once"));
                }
                if area.kind != AreaKind::Absolute {
                    return Err(Error::linkage(format!(
                        "_HEADER0 in {} is not absolute",
                        module.name
                    )));
                }
                if area.addr != MAIN_BASE {
                    return Err(Error::linkage(format!(
                        "_HEADER0 in {} is not at 0x4000",
                        module.name
                    )));
                }
                area.rom_addr = Some(area.addr);
                *rom_ptr = area.addr + area.size;
                found = true;
            }
        }
    }
    if !found {
        return Err(Error::linkage("no _HEADER0 area in any enabled module"));
    }
    Ok(())
}

fn layout_rom_pass(store: &mut ModuleStore, area_name: &str, rom_ptr: &mut u32) -> Result<()> {
    for group in store.values_mut() {
        for module in group.iter_mut() {
            if !module.enabled {
                continue;
            }
            for area in module.areas.iter_mut() {
                if area.name != area_name {
                    continue;
                }
                if area.kind != AreaKind::Relative {
                    return Err(Error::linkage(format!(
                        "{area_name} in {} is not relative",
                        module.name
                    )));
                }
                area.addr = *rom_ptr;
                area.rom_addr = Some(*rom_ptr);
                *rom_ptr += area.size;
            }
        }
    }
    Ok(())
}

fn layout_home(store: &mut ModuleStore, rom_ptr: &mut u32, ram_ptr: &mut u32) -> Result<()> {
    for group in store.values_mut() {
        for module in group.iter_mut() {
            if !module.enabled {
                continue;
            }
            for area in module.areas.iter_mut() {
                if area.name != "_HOME" {
                    continue;
                }
                if area.kind != AreaKind::Relative {
                    return Err(Error::linkage(format!("_HOME in {} is not relative", module.name)));
                }
                area.addr = *ram_ptr;
                area.rom_addr = Some(*rom_ptr);
                *rom_ptr += area.size;
                *ram_ptr += area.size;
            }
        }
    }
    Ok(())
}

fn layout_ram_pass(store: &mut ModuleStore, area_name: &str, ram_ptr: &mut u32) -> Result<()> {
    for group in store.values_mut() {
        for module in group.iter_mut() {
            if !module.enabled {
                continue;
            }
            for area in module.areas.iter_mut() {
                if area.name != area_name {
                    continue;
                }
                if area.kind != AreaKind::Relative {
                    return Err(Error::linkage(format!(
                        "{area_name} in {} is not relative",
                        module.name
                    )));
                }
                area.addr = *ram_ptr;
                area.rom_addr = None;
                *ram_ptr += area.size;
            }
        }
    }
    Ok(())
}

/// Assign each requested module group a page, from every segment-request
/// reference found in any enabled module. A conflicting reassignment is fatal.
fn assign_pages(store: &mut ModuleStore) -> Result<()> {
    let mut requests: Vec<(String, u8, String)> = Vec::new();
    for group in store.values() {
        for module in group {
            if !module.enabled {
                continue;
            }
            for symbol in &module.symbols {
                if symbol.kind != SymbolKind::Ref {
                    continue;
                }
                if let Directive::SegmentRequest { module: target, page } =
                    classify(&symbol.name, symbol.kind)?
                {
                    requests.push((target, page, module.name.clone()));
                }
            }
        }
    }

    for (target, page, requester) in requests {
        let group = store
            .get_mut(&target)
            .ok_or_else(|| Error::linkage(format!("module {target} requested by {requester} is unknown")))?;
        for module in group.iter_mut() {
            match module.page {
                None => module.page = Some(page),
                Some(p) if p == page => {}
                Some(_) => {
                    return Err(Error::linkage(format!(
                        "module {target} is required at conflicting pages"
                    )))
                }
            }
        }
    }
    Ok(())
}

/// A module that contributes `_CODE` but is never the target of a
/// segment-request defaults to page A: it is expected to be reachable
/// without a bank switch (e.g. startup code called before any page is
/// paged in deliberately).
fn default_unrequested_pages(store: &mut ModuleStore) {
    for group in store.values_mut() {
        for module in group.iter_mut() {
            if module.enabled && module.page.is_none() && module.code_size() > 0 {
                module.page = Some(0);
            }
        }
    }
}

fn pack_code_segments(store: &mut ModuleStore, rom_ptr: u32) -> Result<()> {
    let mut capacities: Vec<i64> = (0..4)
        .map(|i| (MAIN_BASE as i64 + 0x2000 + 0x2000 * i - rom_ptr as i64).max(0))
        .collect();

    let mut groups: Vec<(String, u32)> = Vec::new();
    for (name, modules) in store.iter() {
        let total: u32 = modules.iter().filter(|m| m.enabled).map(|m| m.code_size()).sum();
        if total == 0 {
            continue;
        }
        for module in modules {
            if !module.enabled {
                continue;
            }
            if module.code_size() > SEGMENT_SIZE {
                return Err(Error::capacity(format!(
                    "module {} has {} bytes of _CODE, over the 8 KiB budget",
                    module.name,
                    module.code_size()
                )));
            }
            if module.code_size() > 0 && module.page.is_none() {
                return Err(Error::linkage(format!(
                    "module {} contributes _CODE but was never allocated a page",
                    module.name
                )));
            }
        }
        groups.push((name.clone(), total));
    }
    groups.sort_by(|a, b| b.1.cmp(&a.1));

    for (name, total) in groups {
        let mut slot = capacities.iter().position(|&cap| cap >= total as i64);
        if slot.is_none() {
            capacities.push(SEGMENT_SIZE as i64);
            slot = Some(capacities.len() - 1);
        }
        let segment = slot.unwrap();

        let modules = store.get_mut(&name).expect("group name came from this store");
        for module in modules.iter_mut() {
            if !module.enabled {
                continue;
            }
            let page = module.page.expect("checked above") as u32;
            for area in module.areas.iter_mut() {
                if area.name != "_CODE" {
                    continue;
                }
                let remaining = capacities[segment] as u32;
                area.addr = SEGMENT_SIZE * (2 + page) + SEGMENT_SIZE - remaining;
                area.rom_addr = Some(SEGMENT_SIZE * (2 + segment as u32) + SEGMENT_SIZE - remaining);
                capacities[segment] -= area.size as i64;
            }
            module.segment = segment as u32;
        }
    }

    Ok(())
}

/// For every `Def` symbol, `absolute_address = owning_area.addr + symbol.addr`.
fn resolve_symbol_addresses(store: &mut ModuleStore) {
    for group in store.values_mut() {
        for module in group.iter_mut() {
            if !module.enabled {
                continue;
            }
            let mut area_addr: HashMap<String, u32> = HashMap::new();
            for area in &module.areas {
                area_addr.insert(area.name.clone(), area.addr);
            }
            for symbol in module.symbols.iter_mut() {
                if symbol.kind != SymbolKind::Def {
                    continue;
                }
                let base = area_addr.get(&symbol.area_name).copied().unwrap_or(0);
                symbol.absolute_address = Some(base + symbol.addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::parse_object;
    use crate::resolve::resolve;

    fn link_modules(texts: &[(&str, &str)]) -> ModuleStore {
        let modules = texts
            .iter()
            .map(|(name, text)| parse_object(name, text.to_string()).unwrap())
            .collect();
        resolve(modules).unwrap()
    }

    #[test]
    fn header_only_module_lands_at_main_base() {
        let mut store = link_modules(&[(
            "main.rel",
            "XL2\n\
             A _HEADER0 size 0040 flags 8 addr 4000\n\
             S ___ML_CONFIG_RAM_START Def0000\n",
        )]);
        let layout = layout(&mut store).unwrap();
        assert_eq!(layout.rom_ptr, 0x4040);
        assert_eq!(layout.config["RAM_START"], 0);
    }

    #[test]
    fn code_area_lands_inside_its_segment_window() {
        let mut store = link_modules(&[(
            "main.rel",
            "XL2\n\
             A _HEADER0 size 0040 flags 8 addr 4000\n\
             A _CODE size 0100 flags 0 addr 0000\n\
             S ___ML_CONFIG_RAM_START DefC000\n",
        )]);
        layout(&mut store).unwrap();
        let module = &store["main"][0];
        let code = module.areas.iter().find(|a| a.name == "_CODE").unwrap();
        let rom_addr = code.rom_addr.unwrap();
        assert_eq!(code.addr & 0x1FFF, rom_addr & 0x1FFF);
        assert_eq!(rom_addr >> 13, 2 + module.segment);
    }

    #[test]
    fn missing_ram_start_is_fatal() {
        let mut store = link_modules(&[(
            "main.rel",
            "XL2\nA _HEADER0 size 0040 flags 8 addr 4000\n",
        )]);
        assert!(layout(&mut store).is_err());
    }

    #[test]
    fn header_not_at_fixed_address_is_fatal() {
        let mut store = link_modules(&[(
            "main.rel",
            "XL2\nA _HEADER0 size 0040 flags 8 addr 5000\nS ___ML_CONFIG_RAM_START Def0000\n",
        )]);
        assert!(layout(&mut store).is_err());
    }

    #[test]
    fn packs_by_descending_code_size() {
        let mut store = link_modules(&[
            (
                "main.rel",
                "XL2\nA _HEADER0 size 0040 flags 8 addr 4000\n\
                 S ___ML_CONFIG_RAM_START DefC000\n\
                 S ___ML_SEGMENT_B_big Ref0000\n\
                 S ___ML_SEGMENT_B_mid Ref0000\n\
                 S ___ML_SEGMENT_B_small Ref0000\n\
                 S _need_big Ref0000\nS _need_mid Ref0000\nS _need_small Ref0000\n",
            ),
            (
                "big.rel",
                "XL2\nM big\nA _CODE size 1800 flags 0 addr 0000\nS _need_big Def0000\n",
            ),
            (
                "mid.rel",
                "XL2\nM mid\nA _CODE size 1000 flags 0 addr 0000\nS _need_mid Def0000\n",
            ),
            (
                "small.rel",
                "XL2\nM small\nA _CODE size 0700 flags 0 addr 0000\nS _need_small Def0000\n",
            ),
        ]);
        layout(&mut store).unwrap();
        let big_segment = store["big"][0].segment;
        let mid_segment = store["mid"][0].segment;
        let small_segment = store["small"][0].segment;
        assert_ne!(big_segment, mid_segment);
        assert_eq!(big_segment, small_segment);
    }
}
