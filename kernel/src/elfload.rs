//! ELF32 program loading, split in two phases so `execve` can fail
//! safely: `open` reads and validates without touching the address
//! space; `install` tears the old user image down and eagerly maps the
//! new one. Anything that goes wrong in `open` leaves the caller intact.

use crate::{
    filesys,
    ram::{
        align_down, align_up,
        frames::FRAME_ALLOC,
        p2v,
        paging::{flags, AddrSpace},
        KERNEL_BASE, PAGE_4KIB
    }
};

use alloc::{string::String, vec::Vec};
use xmas_elf::{header, program::Type, ElfFile};

// e_machine for Intel 80386, little-endian in the raw header
const EM_386: u8 = 3;
const ET_EXEC: u8 = 2;

pub struct Image {
    data: Vec<u8>
}

/// Read `name` from the filesystem and validate it as a static i386
/// executable. No address-space side effects.
pub fn open(name: &str) -> Result<Image, String> {
    let data = filesys::read_file(name)?;

    let elf = ElfFile::new(&data).map_err(String::from)?;
    if elf.header.pt1.class() != header::Class::ThirtyTwo {
        return Err("not a 32-bit ELF".into());
    }
    // e_type and e_machine straight from the identification bytes
    if data.len() < 20 || data[16] != ET_EXEC || data[17] != 0 {
        return Err("not an executable ELF".into());
    }
    if data[18] != EM_386 || data[19] != 0 {
        return Err("not an i386 ELF".into());
    }

    let loadable = elf
        .program_iter()
        .any(|ph| ph.get_type() == Ok(Type::Load) && ph.mem_size() > 0);
    if !loadable {
        return Err("no loadable segments".into());
    }

    return Ok(Image { data });
}

impl Image {
    /// Replace the user half of `space` with this image and return the
    /// entry point. Every page of every PT_LOAD segment is mapped
    /// user+writable and zeroed up front; file bytes are copied in and
    /// the BSS tail zeroed explicitly. `space` must be the installed
    /// address space, since the copies go through user virtual
    /// addresses.
    pub fn install(&self, space: &AddrSpace) -> Result<usize, String> {
        if !space.is_current() {
            return Err("install needs the target space active".into());
        }

        let elf = ElfFile::new(&self.data).map_err(String::from)?;

        // The old image goes first; its frames drop their references
        // before the new image starts consuming memory.
        space.clear_user();

        for ph in elf.program_iter() {
            if ph.get_type() != Ok(Type::Load) { continue; }

            let vaddr = ph.virtual_addr() as usize;
            let mem_size = ph.mem_size() as usize;
            let file_size = ph.file_size() as usize;
            let offset = ph.offset() as usize;

            if mem_size == 0 { continue; }
            let end = vaddr.checked_add(mem_size).ok_or("segment wraps")?;
            if end > KERNEL_BASE {
                return Err("segment reaches into kernel space".into());
            }
            if file_size > mem_size || offset + file_size > self.data.len() {
                return Err("segment exceeds the file".into());
            }

            for page in (align_down(vaddr, PAGE_4KIB)..align_up(end, PAGE_4KIB))
                .step_by(PAGE_4KIB)
            {
                if space.is_mapped(page) { continue; }
                let pa = FRAME_ALLOC.alloc().ok_or("out of frames for segment")?;
                unsafe { (p2v(pa) as *mut u8).write_bytes(0, PAGE_4KIB); }
                space.map_page(page, pa, flags::U_RW)?;
            }

            unsafe {
                let dst = vaddr as *mut u8;
                dst.copy_from(self.data[offset..].as_ptr(), file_size);
                dst.add(file_size).write_bytes(0, mem_size - file_size);
            }
        }

        return Ok(elf.header.pt2.entry_point() as usize);
    }
}
