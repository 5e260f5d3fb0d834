//! Linker for bank-switched megarom cartridge images.
//!
//! The pipeline: parse objects and archives (C1/C2), classify linker
//! directives (C3), resolve the enabled module set (C4), allocate pages and
//! segments then lay out memory (C5/C6), apply relocations (C7), and write
//! the ROM image plus its map files (C8).

pub mod archive;
pub mod directive;
pub mod error;
pub mod layout;
pub mod module;
pub mod object;
pub mod reloc;
pub mod report;
pub mod resolve;

use std::fs;
use std::path::{Path, PathBuf};

pub use error::{Error, ErrorKind, Result};
use module::Module;

/// One input file, classified by extension as the CLI sees it.
#[derive(Debug, Clone)]
pub enum Input {
    Object(PathBuf),
    Archive(PathBuf),
}

/// The result of a successful link: the ROM bytes and the final module
/// store, for callers that want to inspect layout decisions.
pub struct LinkResult {
    pub rom: Vec<u8>,
    pub store: module::ModuleStore,
}

/// Run the full pipeline over `inputs` and return the linked ROM image.
pub fn link(inputs: &[Input]) -> Result<LinkResult> {
    if inputs.is_empty() {
        return Err(Error::format("no input files given"));
    }

    let mut parsed: Vec<Module> = Vec::new();
    for input in inputs {
        match input {
            Input::Object(path) => {
                log::debug!("reading object {}", path.display());
                let content = fs::read_to_string(path)?;
                parsed.push(object::parse_object(&path.to_string_lossy(), content)?);
            }
            Input::Archive(path) => {
                log::debug!("reading archive {}", path.display());
                let data = fs::read(path)?;
                parsed.extend(archive::parse_archive(&path.to_string_lossy(), data.as_slice())?);
            }
        }
    }

    let mut store = resolve::resolve(parsed)?;
    log::info!("{} module(s) enabled after resolution", store.values().map(Vec::len).sum::<usize>());

    let layout = layout::layout(&mut store)?;
    log::info!(
        "layout: rom_ptr=0x{:04X} ram_ptr=0x{:04X}",
        layout.rom_ptr,
        layout.ram_ptr
    );

    let rom = reloc::apply_relocations(&store, &layout.config)?;

    Ok(LinkResult { rom, store })
}

/// Write a completed link's outputs: the ROM image and its two map files.
pub fn write_outputs(result: &LinkResult, rom_path: &Path) -> Result<()> {
    report::write_rom(rom_path, &result.rom)?;
    let (areas_path, symbols_path) = report::map_paths(rom_path);
    report::write_areas_map(&areas_path, &result.store)?;
    report::write_symbols_map(&symbols_path, &result.store)?;
    Ok(())
}
