//! Embedding tables as NumPy `.npy` arrays.
//!
//! A table is an `N x D` float32 array plus a JSON list of the `N` row IDs,
//! stored as two sibling archive entries so an importer can re-associate each
//! row with its image or crop.

use std::io::Cursor;

use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};

use crate::format::error::FormatError;

/// Row-aligned embedding vectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingTable {
    /// Catalog IDs, one per row
    pub ids: Vec<u64>,
    /// Vectors, all of the same dimension
    pub vectors: Vec<Vec<f32>>,
}

impl EmbeddingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row. Rows whose dimension differs from the first row are
    /// rejected and returned as an error message.
    pub fn push(&mut self, id: u64, vector: Vec<f32>) -> Result<(), String> {
        if let Some(dim) = self.dim() {
            if vector.len() != dim {
                return Err(format!(
                    "embedding for {} has dimension {}, expected {}",
                    id,
                    vector.len(),
                    dim
                ));
            }
        }
        self.ids.push(id);
        self.vectors.push(vector);
        Ok(())
    }

    /// Vector dimension, if the table has rows.
    pub fn dim(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Serialize into `(npy bytes, ids json bytes)`.
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<u8>), FormatError> {
        let dim = self.dim().unwrap_or(0);
        let flat: Vec<f32> = self.vectors.iter().flatten().copied().collect();
        let array = Array2::from_shape_vec((self.len(), dim), flat)
            .map_err(|e| FormatError::Npy(e.to_string()))?;

        let mut npy = Cursor::new(Vec::new());
        array
            .write_npy(&mut npy)
            .map_err(|e| FormatError::Npy(e.to_string()))?;

        let ids = serde_json::to_vec(&self.ids)?;
        Ok((npy.into_inner(), ids))
    }

    /// Parse an `.npy` array and its ID list.
    pub fn decode(npy: &[u8], ids_json: &[u8]) -> Result<Self, FormatError> {
        let array = Array2::<f32>::read_npy(Cursor::new(npy))
            .map_err(|e| FormatError::Npy(e.to_string()))?;
        let ids: Vec<u64> = serde_json::from_slice(ids_json)?;

        if array.nrows() != ids.len() {
            return Err(FormatError::invalid_format(format!(
                "embedding array has {} rows but {} ids",
                array.nrows(),
                ids.len()
            )));
        }

        let vectors = array.outer_iter().map(|row| row.to_vec()).collect();
        Ok(Self { ids, vectors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let mut table = EmbeddingTable::new();
        table.push(7, vec![0.5, -1.0, 2.25]).unwrap();
        table.push(9, vec![1.0, 0.0, -0.125]).unwrap();

        let (npy, ids) = table.encode().unwrap();
        assert_eq!(&npy[..6], b"\x93NUMPY");
        assert_eq!(ids, b"[7,9]");

        let decoded = EmbeddingTable::decode(&npy, &ids).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut table = EmbeddingTable::new();
        table.push(1, vec![0.0; 4]).unwrap();
        assert!(table.push(2, vec![0.0; 3]).is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_row_count_must_match_ids() {
        let mut table = EmbeddingTable::new();
        table.push(1, vec![1.0, 2.0]).unwrap();
        let (npy, _) = table.encode().unwrap();
        assert!(EmbeddingTable::decode(&npy, b"[1, 2]").is_err());
        assert!(EmbeddingTable::decode(b"not npy", b"[1]").is_err());
    }
}
