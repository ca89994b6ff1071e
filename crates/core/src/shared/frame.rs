use ndarray::ArrayView3;

/// A decoded camera frame: contiguous RGB bytes in row-major order.
///
/// Frames travel through the recorder in their encoded form; decoding only
/// happens where pixels are needed (inside a detector).
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    seq: u64,
}

const CHANNELS: usize = 3;

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * CHANNELS,
            "data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
            seq,
        }
    }

    /// Decodes an encoded image (JPEG, PNG, ...) into RGB pixels.
    pub fn decode(encoded: &[u8], seq: u64) -> Result<Self, image::ImageError> {
        let rgb = image::load_from_memory(encoded)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self::new(rgb.into_raw(), width, height, seq))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(
            (self.height as usize, self.width as usize, CHANNELS),
            &self.data,
        )
        .expect("Frame data length must match dimensions")
    }
}
