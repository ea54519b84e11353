//! Shader bytecode sources

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;

use super::{AssetError, AssetResult};

/// Something that can hand out SPIR-V bytecode by key
///
/// Implementations return the raw bytes; [`ShaderSource::load_words`] does
/// the validation every caller needs.
pub trait ShaderSource {
    /// Read the raw bytes stored under `key`
    fn read_bytes(&self, key: &str) -> AssetResult<Vec<u8>>;

    /// Read `key` and decode it into aligned SPIR-V words
    ///
    /// Zero-length reads and bytecode that is not a whole number of words
    /// with the SPIR-V magic number are errors.
    fn load_words(&self, key: &str) -> AssetResult<Vec<u32>> {
        let bytes = self.read_bytes(key)?;
        if bytes.is_empty() {
            return Err(AssetError::Empty(key.to_string()));
        }

        ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|e| AssetError::InvalidBytecode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Loads shaders from a directory of `.spv` files
#[derive(Debug, Clone)]
pub struct FileShaderSource {
    directory: PathBuf,
}

impl FileShaderSource {
    /// Create a source rooted at `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    /// Directory shaders are read from
    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }
}

impl ShaderSource for FileShaderSource {
    fn read_bytes(&self, key: &str) -> AssetResult<Vec<u8>> {
        let path = self.directory.join(key);
        log::debug!("[SHADER] Reading {:?}", path);
        std::fs::read(&path).map_err(|source| AssetError::Io { path, source })
    }
}

/// Shader bytecode kept in memory, keyed by name
///
/// Handy for embedding precompiled shaders with `include_bytes!`.
#[derive(Debug, Clone, Default)]
pub struct MemoryShaderSource {
    shaders: HashMap<String, Vec<u8>>,
}

impl MemoryShaderSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytecode under `key`
    pub fn insert(&mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.shaders.insert(key.into(), bytes.into());
    }
}

impl ShaderSource for MemoryShaderSource {
    fn read_bytes(&self, key: &str) -> AssetResult<Vec<u8>> {
        self.shaders.get(key).cloned().ok_or_else(|| AssetError::Io {
            path: PathBuf::from(key),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "shader not registered"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn fake_module() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0300, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_empty_bytecode_is_an_error() {
        let mut source = MemoryShaderSource::new();
        source.insert("empty.spv", Vec::new());
        assert!(matches!(source.load_words("empty.spv"), Err(AssetError::Empty(_))));
    }

    #[test]
    fn test_misaligned_bytecode_is_rejected() {
        let mut source = MemoryShaderSource::new();
        let mut bytes = fake_module();
        bytes.push(0);
        source.insert("odd.spv", bytes);
        assert!(matches!(source.load_words("odd.spv"), Err(AssetError::InvalidBytecode { .. })));
    }

    #[test]
    fn test_valid_words_are_decoded() {
        let mut source = MemoryShaderSource::new();
        source.insert("ok.spv", fake_module());
        let words = source.load_words("ok.spv").unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let source = FileShaderSource::new("/definitely/not/here");
        match source.read_bytes("a.spv") {
            Err(AssetError::Io { path, .. }) => assert!(path.ends_with("a.spv")),
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }
}
