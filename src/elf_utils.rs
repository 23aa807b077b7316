//! ELF loader: reads an ELF file's `PT_LOAD` program headers and installs
//! each segment into RAM.
//!
//! Grounded on `riscvemu/src/elf_utils.rs`'s use of the `elf` crate
//! (`ElfBytes::<AnyEndian>::minimal_parse`), generalised from that file's
//! `.text`-section-only `read_text_instructions`/`load_elf` to every
//! loadable segment: writes `[vaddr, vaddr + filesz)` from the segment
//! bytes and zero-fills `[vaddr + filesz, vaddr + memsz)` for bss. Writes
//! go through [`Ram::write_bytes`], the bulk path that device doc comment
//! already calls out as existing for this loader.

use elf::abi::PT_LOAD;
use elf::endian::AnyEndian;
use elf::ElfBytes;
use thiserror::Error;

use crate::devices::ram::Ram;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid ELF file: {0}", path = .path)]
    Parse { path: String, source: elf::ParseError },
    #[error(
        "PT_LOAD segment at vaddr 0x{vaddr:x} (size 0x{size:x}) falls outside \
         the RAM window based at 0x{ram_base:x}"
    )]
    OutsideRam { vaddr: u64, size: u64, ram_base: u64 },
}

/// Load every `PT_LOAD` segment of the ELF file at `path` into `ram`,
/// treating `ram_base` as the load address `ram`'s offset 0 corresponds to.
/// Returns the entry point recorded in the ELF header, for callers that
/// want to honour it instead of starting at `ram_base`.
pub fn load_elf(ram: &Ram, ram_base: u64, path: &str) -> Result<u64, ElfError> {
    let file_data = std::fs::read(path).map_err(|source| ElfError::Io {
        path: path.to_string(),
        source,
    })?;

    let file = ElfBytes::<AnyEndian>::minimal_parse(&file_data).map_err(|source| {
        ElfError::Parse { path: path.to_string(), source }
    })?;

    let segments = match file.segments() {
        Some(segments) => segments,
        None => return Ok(file.ehdr.e_entry),
    };

    for phdr in segments.iter() {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        let vaddr = phdr.p_vaddr;
        let filesz = phdr.p_filesz as usize;
        let memsz = phdr.p_memsz as usize;
        let offset = phdr.p_offset as usize;

        let into_ram = |addr: u64, len: u64| -> Result<u64, ElfError> {
            addr.checked_sub(ram_base)
                .filter(|rel| rel.checked_add(len).is_some())
                .ok_or(ElfError::OutsideRam { vaddr: addr, size: len, ram_base })
        };

        let file_bytes = &file_data[offset..offset + filesz];
        let ram_offset = into_ram(vaddr, memsz as u64)?;
        ram.write_bytes(ram_offset, file_bytes)
            .map_err(|_| ElfError::OutsideRam { vaddr, size: memsz as u64, ram_base })?;

        if memsz > filesz {
            let zeroes = vec![0u8; memsz - filesz];
            ram.write_bytes(ram_offset + filesz as u64, &zeroes)
                .map_err(|_| ElfError::OutsideRam { vaddr, size: memsz as u64, ram_base })?;
        }
    }

    Ok(file.ehdr.e_entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Device;

    /// Hand-assembled minimal ELF64 with a single PT_LOAD segment carrying
    /// four bytes of "code" and a memsz four bytes larger (bss padding),
    /// enough to exercise the filesz/memsz split without a real toolchain.
    fn build_minimal_elf(vaddr: u64, payload: &[u8], bss_pad: usize) -> Vec<u8> {
        let ehdr_size = 64usize;
        let phdr_size = 56usize;
        let phdr_off = ehdr_size as u64;
        let data_off = (ehdr_size + phdr_size) as u64;

        let mut bytes = vec![0u8; ehdr_size + phdr_size + payload.len()];
        bytes[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        bytes[4] = 2; // ELFCLASS64
        bytes[5] = 1; // ELFDATA2LSB
        bytes[6] = 1; // EV_CURRENT
        bytes[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
        bytes[18..20].copy_from_slice(&0xf3u16.to_le_bytes()); // e_machine = RISC-V
        bytes[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
        bytes[24..32].copy_from_slice(&vaddr.to_le_bytes()); // e_entry
        bytes[32..40].copy_from_slice(&phdr_off.to_le_bytes()); // e_phoff
        bytes[52..54].copy_from_slice(&(ehdr_size as u16).to_le_bytes()); // e_ehsize
        bytes[54..56].copy_from_slice(&(phdr_size as u16).to_le_bytes()); // e_phentsize
        bytes[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

        let p = &mut bytes[ehdr_size..ehdr_size + phdr_size];
        p[0..4].copy_from_slice(&(PT_LOAD).to_le_bytes());
        p[4..8].copy_from_slice(&7u32.to_le_bytes()); // p_flags = RWX
        p[8..16].copy_from_slice(&data_off.to_le_bytes()); // p_offset
        p[16..24].copy_from_slice(&vaddr.to_le_bytes()); // p_vaddr
        p[24..32].copy_from_slice(&vaddr.to_le_bytes()); // p_paddr
        p[32..40].copy_from_slice(&(payload.len() as u64).to_le_bytes()); // p_filesz
        p[40..48].copy_from_slice(&((payload.len() + bss_pad) as u64).to_le_bytes()); // p_memsz

        bytes[data_off as usize..data_off as usize + payload.len()].copy_from_slice(payload);
        bytes
    }

    #[test]
    fn loads_segment_bytes_and_zero_fills_bss() {
        let ram_base = 0x8000_0000u64;
        let payload = [0xde, 0xad, 0xbe, 0xef];
        let elf_bytes = build_minimal_elf(ram_base, &payload, 4);

        let dir = std::env::temp_dir();
        let path = dir.join(format!("elf_utils_test_{}.bin", std::process::id()));
        std::fs::write(&path, &elf_bytes).unwrap();

        let ram = Ram::new(0x1000);
        let entry = load_elf(&ram, ram_base, path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(entry, ram_base);
        assert_eq!(ram.load(0, 4).unwrap(), 0xefbe_adde);
        assert_eq!(ram.load(4, 4).unwrap(), 0);
    }

    #[test]
    fn segment_outside_the_ram_window_is_rejected() {
        let ram_base = 0x8000_0000u64;
        let payload = [1, 2, 3, 4];
        let elf_bytes = build_minimal_elf(0x1000, &payload, 0); // below ram_base

        let dir = std::env::temp_dir();
        let path = dir.join(format!("elf_utils_test_bad_{}.bin", std::process::id()));
        std::fs::write(&path, &elf_bytes).unwrap();

        let ram = Ram::new(0x1000);
        let result = load_elf(&ram, ram_base, path.to_str().unwrap());
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(ElfError::OutsideRam { .. })));
    }
}
