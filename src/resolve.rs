//! Move-to rewriting and transitive enablement (§4.4).
//!
//! Move-to rewriting runs first and is a one-shot rename of module groups.
//! Transitive enablement is a monotone fixed point over the (now-final) set
//! of module groups: modules only ever become enabled, never disabled, so
//! the loop terminates on the finite module set.

use std::collections::{HashMap, HashSet};

use crate::directive::{classify, Directive};
use crate::error::{Error, Result};
use crate::module::{Module, ModuleStore, SymbolKind};

/// Group freshly parsed modules by name, then apply move-to directives and
/// the transitive enablement closure, pruning anything left disabled.
pub fn resolve(parsed: Vec<Module>) -> Result<ModuleStore> {
    let mut store = ModuleStore::new();
    for module in parsed {
        store.entry(module.name.clone()).or_default().push(module);
    }

    apply_move_to(&mut store)?;
    enable_transitively(&mut store)?;

    store.retain(|_, group| {
        group.retain(|m| m.enabled);
        !group.is_empty()
    });

    Ok(store)
}

fn apply_move_to(store: &mut ModuleStore) -> Result<()> {
    let mut moves: HashMap<String, String> = HashMap::new();

    for group in store.values() {
        for module in group {
            for symbol in &module.symbols {
                if symbol.kind != SymbolKind::Def {
                    continue;
                }
                if let Directive::MoveTo { target, source } =
                    classify(&symbol.name, symbol.kind)?
                {
                    if let Some(existing) = moves.get(&source) {
                        if *existing != target {
                            return Err(Error::linkage(format!(
                                "module {source} is moved to both {existing} and {target}"
                            )));
                        }
                    } else {
                        moves.insert(source, target);
                    }
                }
            }
        }
    }

    for (source, target) in &moves {
        if !store.contains_key(source) {
            return Err(Error::linkage(format!(
                "move-to source module {source} does not exist"
            )));
        }
        if source != target && moves.contains_key(target) {
            return Err(Error::linkage(format!(
                "move-to chain: {target} is both a target and a source"
            )));
        }
    }

    for (source, target) in moves {
        if source == target {
            continue;
        }
        let modules = store.shift_remove(&source).expect("checked above");
        store.entry(target).or_default().extend(modules);
    }

    Ok(())
}

fn enable_transitively(store: &mut ModuleStore) -> Result<()> {
    let module_names: HashSet<String> = store.keys().cloned().collect();

    loop {
        let mut referenced: indexmap::IndexMap<String, u32> = indexmap::IndexMap::new();

        for group in store.values() {
            for module in group {
                if !module.enabled {
                    continue;
                }
                for symbol in &module.symbols {
                    if symbol.kind != SymbolKind::Ref {
                        continue;
                    }
                    match classify(&symbol.name, symbol.kind)? {
                        Directive::SegmentRequest { module: target, .. } => {
                            if !module_names.contains(&target) {
                                return Err(Error::linkage(format!(
                                    "module {} requested by {} is unknown",
                                    target, module.name
                                )));
                            }
                        }
                        Directive::Ordinary => {
                            referenced.entry(symbol.name.clone()).or_insert(0);
                        }
                        Directive::Configuration { .. } | Directive::MoveTo { .. } => {}
                    }
                }
            }
        }

        let mut updated = false;
        let mut defined: HashSet<String> = HashSet::new();

        for group in store.values_mut() {
            for module in group {
                let mut newly_enabled = false;
                for symbol in &module.symbols {
                    if symbol.kind != SymbolKind::Def {
                        continue;
                    }
                    if classify(&symbol.name, symbol.kind)? != Directive::Ordinary {
                        continue;
                    }
                    if referenced.contains_key(&symbol.name) && !module.enabled {
                        newly_enabled = true;
                    }
                }
                if newly_enabled {
                    module.enabled = true;
                    updated = true;
                }
                if module.enabled {
                    for symbol in &module.symbols {
                        if symbol.kind != SymbolKind::Def {
                            continue;
                        }
                        if classify(&symbol.name, symbol.kind)? != Directive::Ordinary {
                            continue;
                        }
                        if let Some(count) = referenced.get_mut(&symbol.name) {
                            if !defined.insert(symbol.name.clone()) {
                                return Err(Error::linkage(format!(
                                    "symbol {} is defined multiple times",
                                    symbol.name
                                )));
                            }
                            *count += 1;
                        }
                    }
                }
            }
        }

        for (name, count) in &referenced {
            if *count == 0 {
                return Err(Error::linkage(format!("referenced symbol {name} is not defined")));
            }
        }

        if !updated {
            break;
        }
    }

    Ok(())
}
