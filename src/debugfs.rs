//! In-memory attribute tree.
//!
//! Plugins publish their controls as files under a directory [`Node`], the
//! way debugfs files are published in a Linux kernel. Each file carries an
//! optional read and write callback; integer files are backed by a shared
//! value cell. The embedding kernel forwards its own file operations to
//! [`Node::read_at`] / [`Node::write_at`].

use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{AxError, AxResult};
use spin::Mutex;

/// Read callback: `(offset, len)` to at most `len` bytes starting at `offset`.
pub type ReadFn = Box<dyn Fn(usize, usize) -> AxResult<Vec<u8>> + Send + Sync>;

/// Write callback: `(offset, data)` to the number of bytes consumed.
pub type WriteFn = Box<dyn Fn(usize, &[u8]) -> AxResult<usize> + Send + Sync>;

/// Getter of a simple integer attribute.
pub type GetFn = Box<dyn Fn() -> AxResult<u64> + Send + Sync>;

/// Setter of a simple integer attribute.
pub type SetFn = Box<dyn Fn(u64) -> AxResult<()> + Send + Sync>;

/// A value shared between a file and the plugin that owns it.
pub type Shared<T> = Arc<Mutex<T>>;

/// Wrap `value` into a [`Shared`] cell.
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub const MODE_RO: u16 = 0o444;
pub const MODE_WO: u16 = 0o222;
pub const MODE_RW: u16 = 0o666;

/// Largest chunk [`Node::read`] requests per call.
const READ_CHUNK: usize = 4096;

/// `simple_read_from_buffer`: the part of `content` visible at `offset`.
pub fn simple_read(content: &[u8], offset: usize, len: usize) -> Vec<u8> {
    if offset >= content.len() {
        return Vec::new();
    }
    let end = content.len().min(offset.saturating_add(len));
    content[offset..end].to_vec()
}

/// Format like debugfs `x64` files: `0x%016llx\n`.
pub fn format_x64(value: u64) -> String {
    format!("0x{:016x}\n", value)
}

/// Parse an unsigned integer like `kstrtoull(s, 0, ..)`.
///
/// `0x` selects hex, a leading `0` octal, anything else decimal. One
/// trailing newline is accepted.
pub fn parse_u64(input: &str) -> AxResult<u64> {
    let s = input.strip_suffix('\n').unwrap_or(input);
    let s = s.strip_prefix('+').unwrap_or(s);
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(AxError::InvalidInput);
    }
    u64::from_str_radix(digits, radix).map_err(|_| AxError::InvalidInput)
}

/// Parse a written buffer as one integer.
pub fn parse_u64_bytes(data: &[u8]) -> AxResult<u64> {
    let s = core::str::from_utf8(data).map_err(|_| AxError::InvalidInput)?;
    parse_u64(s)
}

/// A file inside a [`Node`].
pub struct Attribute {
    name: String,
    mode: u16,
    read: Option<ReadFn>,
    write: Option<WriteFn>,
}

impl Attribute {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> u16 {
        self.mode
    }

    pub fn read_at(&self, offset: usize, len: usize) -> AxResult<Vec<u8>> {
        match &self.read {
            Some(read) if self.mode & MODE_RO != 0 => read(offset, len),
            _ => Err(AxError::PermissionDenied),
        }
    }

    pub fn write_at(&self, offset: usize, data: &[u8]) -> AxResult<usize> {
        match &self.write {
            Some(write) if self.mode & MODE_WO != 0 => write(offset, data),
            _ => Err(AxError::PermissionDenied),
        }
    }
}

enum Entry {
    Dir(Arc<Node>),
    File(Arc<Attribute>),
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Dir(node) => &node.name,
            Entry::File(attr) => &attr.name,
        }
    }
}

/// A directory of attributes and subdirectories.
pub struct Node {
    name: String,
    entries: Mutex<Vec<Entry>>,
}

impl Node {
    /// Create a detached directory (the toolkit root).
    pub fn root(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn insert(&self, entry: Entry) -> AxResult<()> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.name() == entry.name()) {
            return axerrno::ax_err!(AlreadyExists, "debugfs: entry already exists");
        }
        entries.push(entry);
        Ok(())
    }

    /// Create a subdirectory.
    pub fn create_dir(&self, name: &str) -> AxResult<Arc<Node>> {
        let dir = Node::root(name);
        self.insert(Entry::Dir(dir.clone()))?;
        Ok(dir)
    }

    /// Create a file with raw read/write callbacks.
    pub fn create_file(
        &self,
        name: &str,
        mode: u16,
        read: Option<ReadFn>,
        write: Option<WriteFn>,
    ) -> AxResult<()> {
        self.insert(Entry::File(Arc::new(Attribute {
            name: name.to_string(),
            mode,
            read,
            write,
        })))
    }

    /// Read-only text file.
    pub fn create_string(&self, name: &str, mode: u16, value: &str) -> AxResult<()> {
        let value = value.to_string();
        self.create_file(
            name,
            mode & MODE_RO,
            Some(Box::new(move |off, len| Ok(simple_read(value.as_bytes(), off, len)))),
            None,
        )
    }

    /// Integer file with custom getter/setter, shown as `0x%llx\n`.
    pub fn create_attribute(
        &self,
        name: &str,
        mode: u16,
        get: Option<GetFn>,
        set: Option<SetFn>,
    ) -> AxResult<()> {
        let read: Option<ReadFn> = get.map(|get| -> ReadFn {
            Box::new(move |off, len| {
                let text = format!("0x{:x}\n", get()?);
                Ok(simple_read(text.as_bytes(), off, len))
            })
        });
        let write: Option<WriteFn> = set.map(|set| -> WriteFn {
            Box::new(move |_, data| {
                set(parse_u64_bytes(data)?)?;
                Ok(data.len())
            })
        });
        self.create_file(name, mode, read, write)
    }

    fn create_integer(
        &self,
        name: &str,
        mode: u16,
        cell: Shared<u64>,
        format: fn(u64) -> String,
    ) -> AxResult<()> {
        let reader = cell.clone();
        self.create_file(
            name,
            mode,
            Some(Box::new(move |off, len| {
                let text = format(*reader.lock());
                Ok(simple_read(text.as_bytes(), off, len))
            })),
            Some(Box::new(move |_, data| {
                *cell.lock() = parse_u64_bytes(data)?;
                Ok(data.len())
            })),
        )
    }

    /// 64-bit value shown as `0x%016llx\n`.
    pub fn create_x64(&self, name: &str, mode: u16, cell: Shared<u64>) -> AxResult<()> {
        self.create_integer(name, mode, cell, format_x64)
    }

    /// `unsigned long` shown in decimal.
    pub fn create_ulong(&self, name: &str, mode: u16, cell: Shared<u64>) -> AxResult<()> {
        self.create_integer(name, mode, cell, |v| format!("{}\n", v))
    }

    /// 32-bit value shown in decimal. Writes wider than 32 bits are rejected.
    pub fn create_u32(&self, name: &str, mode: u16, cell: Shared<u32>) -> AxResult<()> {
        let reader = cell.clone();
        self.create_file(
            name,
            mode,
            Some(Box::new(move |off, len| {
                let text = format!("{}\n", *reader.lock());
                Ok(simple_read(text.as_bytes(), off, len))
            })),
            Some(Box::new(move |_, data| {
                let value =
                    u32::try_from(parse_u64_bytes(data)?).map_err(|_| AxError::InvalidInput)?;
                *cell.lock() = value;
                Ok(data.len())
            })),
        )
    }

    /// Remove the entry `name` (and everything below it).
    pub fn remove(&self, name: &str) -> AxResult<()> {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.name() == name) {
            Some(idx) => {
                entries.remove(idx);
                Ok(())
            }
            None => axerrno::ax_err!(NotFound, "debugfs: no such entry"),
        }
    }

    /// Names of the entries directly below this node, in creation order.
    pub fn list(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.name().to_string()).collect()
    }

    fn child(&self, name: &str) -> Option<Entry> {
        self.entries.lock().iter().find(|e| e.name() == name).map(|e| match e {
            Entry::Dir(node) => Entry::Dir(node.clone()),
            Entry::File(attr) => Entry::File(attr.clone()),
        })
    }

    /// Directory at `path` relative to this node.
    pub fn dir(self: &Arc<Self>, path: &str) -> AxResult<Arc<Node>> {
        let mut node = self.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            node = match node.child(part) {
                Some(Entry::Dir(dir)) => dir,
                _ => return axerrno::ax_err!(NotFound, "debugfs: no such directory"),
            };
        }
        Ok(node)
    }

    /// File at `path` relative to this node.
    pub fn lookup(self: &Arc<Self>, path: &str) -> AxResult<Arc<Attribute>> {
        let (dir, file) = match path.rsplit_once('/') {
            Some((dir, file)) => (self.dir(dir)?, file),
            None => (self.clone(), path),
        };
        match dir.child(file) {
            Some(Entry::File(attr)) => Ok(attr),
            _ => Err(AxError::NotFound),
        }
    }

    pub fn read_at(self: &Arc<Self>, path: &str, offset: usize, len: usize) -> AxResult<Vec<u8>> {
        self.lookup(path)?.read_at(offset, len)
    }

    pub fn write_at(self: &Arc<Self>, path: &str, offset: usize, data: &[u8]) -> AxResult<usize> {
        self.lookup(path)?.write_at(offset, data)
    }

    /// Read the whole file, like `cat`.
    pub fn read(self: &Arc<Self>, path: &str) -> AxResult<Vec<u8>> {
        let attr = self.lookup(path)?;
        let mut out = Vec::new();
        loop {
            let chunk = attr.read_at(out.len(), READ_CHUNK)?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    /// Read the whole file as UTF-8 text.
    pub fn read_to_string(self: &Arc<Self>, path: &str) -> AxResult<String> {
        String::from_utf8(self.read(path)?).map_err(|_| AxError::InvalidData)
    }

    /// Write `data` at offset zero, like `echo >`.
    pub fn write(self: &Arc<Self>, path: &str, data: &[u8]) -> AxResult<usize> {
        self.write_at(path, 0, data)
    }
}
