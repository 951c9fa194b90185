//! Binary masks and COCO run-length encoding.
//!
//! Masks are flattened in column-major order (all rows of column 0, then
//! column 1, ...) and encoded as alternating background/foreground run
//! lengths, always starting with a background run. A mask whose first pixel
//! is foreground therefore starts with a zero-length run.
//!
//! The compressed string form packs each count (counts after the second are
//! stored as the difference to the count two positions earlier) into 5-bit
//! groups, least significant group first. Bit 5 of every character marks a
//! continuation and bit 4 of the last group carries the sign. Each group is
//! offset by 48 to land on printable ASCII. This is the layout pycocotools
//! uses, so strings are interchangeable with it.

use serde::{Deserialize, Serialize};

use super::FormatError;

/// Largest mask, in pixels, that will be materialized as a bitmap.
pub const MAX_MASK_PIXELS: u64 = 1 << 28;

/// Reject mask sizes too large to rasterize.
pub fn check_mask_size(width: u32, height: u32) -> Result<(), FormatError> {
    let pixels = width as u64 * height as u64;
    if pixels > MAX_MASK_PIXELS {
        return Err(FormatError::invalid_format(format!(
            "mask of {}x{} ({} pixels) exceeds the limit of {} pixels",
            width, height, pixels, MAX_MASK_PIXELS
        )));
    }
    Ok(())
}

/// Row-major bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl BinaryMask {
    /// Create an all-background mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    /// Create a mask by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }

    /// Mask width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Mask height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel value; out-of-bounds reads are background.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Set a pixel; out-of-bounds writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            self.data[y as usize * self.width as usize + x as usize] = value;
        }
    }

    /// Number of foreground pixels.
    pub fn count_ones(&self) -> u64 {
        self.data.iter().filter(|&&v| v).count() as u64
    }

    /// Pixels in column-major order.
    pub fn column_major(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.width).flat_map(move |x| (0..self.height).map(move |y| self.get(x, y)))
    }
}

/// Uncompressed COCO run-length encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rle {
    /// Mask height
    pub height: u32,
    /// Mask width
    pub width: u32,
    /// Alternating background/foreground run lengths
    pub counts: Vec<u64>,
}

impl Rle {
    /// Run-length encode a bitmap.
    pub fn encode(mask: &BinaryMask) -> Self {
        let mut counts = Vec::new();
        let mut current = false;
        let mut run = 0u64;

        for pixel in mask.column_major() {
            if pixel != current {
                counts.push(run);
                run = 0;
                current = pixel;
            }
            run += 1;
        }
        counts.push(run);

        Self {
            height: mask.height(),
            width: mask.width(),
            counts,
        }
    }

    /// Create from explicit counts, checking they cover the mask exactly.
    pub fn from_counts(height: u32, width: u32, counts: Vec<u64>) -> Result<Self, FormatError> {
        let rle = Self {
            height,
            width,
            counts,
        };
        rle.validate()?;
        Ok(rle)
    }

    /// Check that the runs sum to `height * width` and the mask is not
    /// oversized.
    pub fn validate(&self) -> Result<(), FormatError> {
        check_mask_size(self.width, self.height)?;
        let expected = self.height as u64 * self.width as u64;
        let total = self
            .counts
            .iter()
            .try_fold(0u64, |acc, &c| acc.checked_add(c))
            .ok_or_else(|| FormatError::invalid_rle("run lengths overflow"))?;
        if total != expected {
            return Err(FormatError::invalid_rle(format!(
                "runs cover {} pixels but mask is {}x{} ({} pixels)",
                total, self.height, self.width, expected
            )));
        }
        Ok(())
    }

    /// Expand back into a bitmap.
    pub fn decode(&self) -> Result<BinaryMask, FormatError> {
        self.validate()?;
        let mut mask = BinaryMask::new(self.width, self.height);
        let height = self.height as u64;
        let mut position = 0u64;
        let mut value = false;

        for &count in &self.counts {
            if value {
                for index in position..position + count {
                    let x = (index / height) as u32;
                    let y = (index % height) as u32;
                    mask.set(x, y, true);
                }
            }
            position += count;
            value = !value;
        }

        Ok(mask)
    }

    /// Foreground pixel count.
    pub fn area(&self) -> u64 {
        self.counts.iter().skip(1).step_by(2).sum()
    }

    /// Pack the counts into the compressed COCO string.
    pub fn to_compressed_string(&self) -> String {
        let mut out = String::new();

        for i in 0..self.counts.len() {
            let mut x = self.counts[i] as i64;
            if i > 2 {
                x -= self.counts[i - 2] as i64;
            }

            let mut more = true;
            while more {
                let mut c = (x & 0x1f) as u8;
                x >>= 5;
                more = if c & 0x10 != 0 { x != -1 } else { x != 0 };
                if more {
                    c |= 0x20;
                }
                out.push(char::from(c + 48));
            }
        }

        out
    }

    /// Parse the compressed COCO string for a mask of the given size.
    pub fn from_compressed_string(height: u32, width: u32, s: &str) -> Result<Self, FormatError> {
        let bytes = s.as_bytes();
        let mut counts: Vec<u64> = Vec::new();
        let mut p = 0;

        while p < bytes.len() {
            let mut x: i64 = 0;
            let mut k: u32 = 0;
            let mut more = true;

            while more {
                let byte = *bytes
                    .get(p)
                    .ok_or_else(|| FormatError::invalid_rle("string ends inside a count"))?;
                if !(48..48 + 64).contains(&byte) {
                    return Err(FormatError::invalid_rle(format!(
                        "invalid character {:?} at offset {}",
                        char::from(byte),
                        p
                    )));
                }
                if k >= 13 {
                    return Err(FormatError::invalid_rle("count does not fit in 64 bits"));
                }

                let c = i64::from(byte - 48);
                x |= (c & 0x1f) << (5 * k);
                more = c & 0x20 != 0;
                p += 1;
                k += 1;

                if !more && c & 0x10 != 0 && 5 * k < 64 {
                    x |= -1i64 << (5 * k);
                }
            }

            let m = counts.len();
            if m > 2 {
                x += counts[m - 2] as i64;
            }
            if x < 0 {
                return Err(FormatError::invalid_rle(format!(
                    "negative run length at index {}",
                    m
                )));
            }
            counts.push(x as u64);
        }

        Self::from_counts(height, width, counts)
    }
}
