use crate::error::{EmulatorError, Result};
use bitflags::bitflags;
use std::{collections::BTreeMap, ops::Range};

pub const PAGE_SIZE: u64 = 0x1000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permission: u32 {
        const NONE = 0;
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        const ALL = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
    }
}

#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub start: u64,
    pub permissions: Permission,
    pub data: Vec<u8>,
}

impl MemoryRegion {
    pub fn new(start: u64, size: usize, permissions: Permission) -> Self {
        Self {
            start,
            permissions,
            data: vec![0; size],
        }
    }

    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end()
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.range().contains(&addr)
    }

    fn offset(&self, addr: u64) -> usize {
        (addr - self.start) as usize
    }
}

/// Guest memory as seen by the emulator. Implementors provide region lookup
/// and mapping; byte and little-endian accessors are built on top.
pub trait MemoryTrait {
    fn find_region(&self, addr: u64) -> Option<&MemoryRegion>;
    fn find_region_mut(&mut self, addr: u64) -> Option<&mut MemoryRegion>;

    fn map(&mut self, addr: u64, size: usize, perms: Permission) -> Result<()>;
    fn unmap(&mut self, addr: u64, size: usize) -> Result<()>;
    fn protect(&mut self, addr: u64, size: usize, perms: Permission) -> Result<()>;

    fn permissions(&self, addr: u64) -> Result<Permission> {
        self.find_region(addr)
            .map(|region| region.permissions)
            .ok_or(EmulatorError::UnmappedMemory(addr))
    }

    /// Checks that `len` bytes at `addr` are mapped with `required` permissions.
    fn check_access(&self, addr: u64, len: usize, required: Permission) -> Result<()> {
        let end = addr.wrapping_add(len as u64);
        let mut current = addr;
        while current != end {
            let region = self
                .find_region(current)
                .ok_or(EmulatorError::UnmappedMemory(current))?;
            if !region.permissions.contains(required) {
                return Err(EmulatorError::PermissionDenied(current));
            }
            let step = (region.end() - current).min(end.wrapping_sub(current));
            current = current.wrapping_add(step);
        }
        Ok(())
    }

    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        self.check_access(addr, buf.len(), Permission::READ)?;
        self.copy_out(addr, buf)
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.check_access(addr, data.len(), Permission::WRITE)?;
        self.copy_in(addr, data)
    }

    /// Writes bytes without permission checks, used for loading code.
    fn write_code(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.check_access(addr, data.len(), Permission::NONE)?;
        self.copy_in(addr, data)
    }

    /// Copies up to `buf.len()` executable bytes starting at `addr`, stopping
    /// at the first byte that is unmapped or not executable.
    fn fetch_code(&self, addr: u64, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            let current = addr.wrapping_add(filled as u64);
            let Some(region) = self.find_region(current) else {
                break;
            };
            if !region.permissions.contains(Permission::EXEC) {
                break;
            }
            let offset = region.offset(current);
            let count = (region.data.len() - offset).min(buf.len() - filled);
            buf[filled..filled + count].copy_from_slice(&region.data[offset..offset + count]);
            filled += count;
        }
        filled
    }

    fn copy_out(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let current = addr.wrapping_add(filled as u64);
            let region = self
                .find_region(current)
                .ok_or(EmulatorError::UnmappedMemory(current))?;
            let offset = region.offset(current);
            let count = (region.data.len() - offset).min(buf.len() - filled);
            buf[filled..filled + count].copy_from_slice(&region.data[offset..offset + count]);
            filled += count;
        }
        Ok(())
    }

    fn copy_in(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            let current = addr.wrapping_add(written as u64);
            let region = self
                .find_region_mut(current)
                .ok_or(EmulatorError::UnmappedMemory(current))?;
            let offset = region.offset(current);
            let count = (region.data.len() - offset).min(data.len() - written);
            region.data[offset..offset + count].copy_from_slice(&data[written..written + count]);
            written += count;
        }
        Ok(())
    }

    fn read_u32(&self, addr: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, addr: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    fn write_u64(&mut self, addr: u64, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }
}

fn page_span(addr: u64, size: usize) -> Result<(u64, u64)> {
    if size == 0 {
        return Err(EmulatorError::InvalidArgument("Size cannot be zero".into()));
    }
    let start = addr & !(PAGE_SIZE - 1);
    let end = addr
        .checked_add(size as u64)
        .and_then(|end| end.checked_add(PAGE_SIZE - 1))
        .map(|end| end & !(PAGE_SIZE - 1))
        .ok_or_else(|| EmulatorError::InvalidArgument(format!("Range overflows at {addr:#x}")))?;
    Ok((start, end))
}

/// Page-granular guest memory backed by owned buffers.
#[derive(Debug, Clone, Default)]
pub struct OwnedMemory {
    regions: BTreeMap<u64, MemoryRegion>,
}

impl OwnedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits the region containing `addr` so that a region starts exactly at `addr`.
    fn split_at(&mut self, addr: u64) {
        let Some(start) = self
            .regions
            .range(..addr)
            .next_back()
            .filter(|(_, region)| region.contains(addr))
            .map(|(&start, _)| start)
        else {
            return;
        };
        let Some(region) = self.regions.get_mut(&start) else {
            return;
        };
        let tail = region.data.split_off((addr - start) as usize);
        let permissions = region.permissions;
        self.regions.insert(
            addr,
            MemoryRegion {
                start: addr,
                permissions,
                data: tail,
            },
        );
    }

    fn regions_in(&self, start: u64, end: u64) -> Vec<u64> {
        self.regions
            .range(start..end)
            .map(|(&region_start, _)| region_start)
            .collect()
    }
}

impl MemoryTrait for OwnedMemory {
    fn find_region(&self, addr: u64) -> Option<&MemoryRegion> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(addr))
    }

    fn find_region_mut(&mut self, addr: u64) -> Option<&mut MemoryRegion> {
        self.regions
            .range_mut(..=addr)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(addr))
    }

    fn map(&mut self, addr: u64, size: usize, perms: Permission) -> Result<()> {
        let (start, end) = page_span(addr, size)?;

        if let Some(region) = self.regions.values().find(|r| r.start < end && start < r.end()) {
            return Err(EmulatorError::InvalidArgument(format!(
                "Memory overlap at {:#x}-{:#x} with {:#x}-{:#x}",
                start,
                end,
                region.start,
                region.end()
            )));
        }

        self.regions.insert(
            start,
            MemoryRegion::new(start, (end - start) as usize, perms),
        );
        Ok(())
    }

    fn unmap(&mut self, addr: u64, size: usize) -> Result<()> {
        let (start, end) = page_span(addr, size)?;
        self.split_at(start);
        self.split_at(end);
        for region_start in self.regions_in(start, end) {
            self.regions.remove(&region_start);
        }
        Ok(())
    }

    fn protect(&mut self, addr: u64, size: usize, perms: Permission) -> Result<()> {
        let (start, end) = page_span(addr, size)?;
        self.check_access(start, (end - start) as usize, Permission::NONE)?;
        self.split_at(start);
        self.split_at(end);
        for region_start in self.regions_in(start, end) {
            if let Some(region) = self.regions.get_mut(&region_start) {
                region.permissions = perms;
            }
        }
        Ok(())
    }
}
