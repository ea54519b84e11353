//! Fixed-capacity table of loaded textures
//!
//! Materials reference textures by [`TextureHandle`], which is the element
//! index in the bindless sampler array.

/// Index of a texture in the bindless array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

impl TextureHandle {
    /// Index as stored in `Material::diffuse_map`
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Append-only table with a capacity fixed at creation
#[derive(Debug)]
pub struct TextureTable<T> {
    entries: Vec<T>,
    capacity: u32,
}

impl<T> TextureTable<T> {
    /// Table holding at most `capacity` entries
    pub fn new(capacity: u32) -> Self {
        Self {
            entries: Vec::with_capacity(capacity as usize),
            capacity,
        }
    }

    /// Append `entry`, or hand it back when the table is full
    pub fn push(&mut self, entry: T) -> Result<TextureHandle, T> {
        if self.entries.len() as u32 >= self.capacity {
            return Err(entry);
        }
        self.entries.push(entry);
        Ok(TextureHandle(self.entries.len() as u32 - 1))
    }

    /// Entry behind `handle`
    pub fn get(&self, handle: TextureHandle) -> Option<&T> {
        self.entries.get(handle.0 as usize)
    }

    /// Number of entries
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Whether no texture has been added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fixed capacity
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Entries in handle order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_sequential() {
        let mut table = TextureTable::new(4);
        assert!(table.is_empty());
        let a = table.push("a").unwrap();
        let b = table.push("b").unwrap();
        assert_eq!((a, b), (TextureHandle(0), TextureHandle(1)));
        assert_eq!(table.get(b), Some(&"b"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_full_table_returns_entry() {
        let mut table = TextureTable::new(1);
        table.push(10).unwrap();
        assert_eq!(table.push(11), Err(11));
        assert_eq!(table.len(), table.capacity());
        assert_eq!(table.iter().copied().collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn test_unknown_handle() {
        let table: TextureTable<u8> = TextureTable::new(8);
        assert!(table.get(TextureHandle(3)).is_none());
    }
}
