//! Raw-buffer texture model: texels packed row-major, layer after layer,
//! single mip level. Only nearest-texel loads and stores are modeled.

use crate::error::{ExecError, ExecResult};
use crate::exec::memory::{f16_to_f32, f32_to_f16};
use crate::exec::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TexelFormat {
    #[default]
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    R8Unorm,
    R32Float,
    R32Uint,
    R32Sint,
    Rg32Float,
    Rg32Uint,
    Rg32Sint,
    Rgba16Float,
    Rgba32Float,
    Rgba32Uint,
    Rgba32Sint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Unorm8,
    Snorm8,
    Uint8,
    Sint8,
    Float16,
    Float32,
    Uint32,
    Sint32,
}

impl TexelFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let format = match name {
            "rgba8unorm" | "rgba8unorm-srgb" => TexelFormat::Rgba8Unorm,
            "rgba8snorm" => TexelFormat::Rgba8Snorm,
            "rgba8uint" => TexelFormat::Rgba8Uint,
            "rgba8sint" => TexelFormat::Rgba8Sint,
            "bgra8unorm" | "bgra8unorm-srgb" => TexelFormat::Bgra8Unorm,
            "r8unorm" => TexelFormat::R8Unorm,
            "r32float" => TexelFormat::R32Float,
            "r32uint" => TexelFormat::R32Uint,
            "r32sint" => TexelFormat::R32Sint,
            "rg32float" => TexelFormat::Rg32Float,
            "rg32uint" => TexelFormat::Rg32Uint,
            "rg32sint" => TexelFormat::Rg32Sint,
            "rgba16float" => TexelFormat::Rgba16Float,
            "rgba32float" => TexelFormat::Rgba32Float,
            "rgba32uint" => TexelFormat::Rgba32Uint,
            "rgba32sint" => TexelFormat::Rgba32Sint,
            _ => return None,
        };
        Some(format)
    }

    fn layout(self) -> (Channel, usize) {
        match self {
            TexelFormat::Rgba8Unorm | TexelFormat::Bgra8Unorm => (Channel::Unorm8, 4),
            TexelFormat::Rgba8Snorm => (Channel::Snorm8, 4),
            TexelFormat::Rgba8Uint => (Channel::Uint8, 4),
            TexelFormat::Rgba8Sint => (Channel::Sint8, 4),
            TexelFormat::R8Unorm => (Channel::Unorm8, 1),
            TexelFormat::R32Float => (Channel::Float32, 1),
            TexelFormat::R32Uint => (Channel::Uint32, 1),
            TexelFormat::R32Sint => (Channel::Sint32, 1),
            TexelFormat::Rg32Float => (Channel::Float32, 2),
            TexelFormat::Rg32Uint => (Channel::Uint32, 2),
            TexelFormat::Rg32Sint => (Channel::Sint32, 2),
            TexelFormat::Rgba16Float => (Channel::Float16, 4),
            TexelFormat::Rgba32Float => (Channel::Float32, 4),
            TexelFormat::Rgba32Uint => (Channel::Uint32, 4),
            TexelFormat::Rgba32Sint => (Channel::Sint32, 4),
        }
    }

    pub fn bytes_per_texel(self) -> usize {
        let (channel, count) = self.layout();
        channel.size() * count
    }
}

impl Channel {
    fn size(self) -> usize {
        match self {
            Channel::Unorm8 | Channel::Snorm8 | Channel::Uint8 | Channel::Sint8 => 1,
            Channel::Float16 => 2,
            Channel::Float32 | Channel::Uint32 | Channel::Sint32 => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> Value {
        match self {
            Channel::Unorm8 => Value::F32(bytes[0] as f32 / 255.0),
            Channel::Snorm8 => Value::F32((bytes[0] as i8 as f32 / 127.0).max(-1.0)),
            Channel::Uint8 => Value::U32(bytes[0] as u32),
            Channel::Sint8 => Value::I32(bytes[0] as i8 as i32),
            Channel::Float16 => Value::F32(f16_to_f32(bytemuck::pod_read_unaligned(bytes))),
            Channel::Float32 => Value::F32(bytemuck::pod_read_unaligned(bytes)),
            Channel::Uint32 => Value::U32(bytemuck::pod_read_unaligned(bytes)),
            Channel::Sint32 => Value::I32(bytemuck::pod_read_unaligned(bytes)),
        }
    }

    fn encode(self, value: &Value, out: &mut [u8]) -> ExecResult<()> {
        match self {
            Channel::Unorm8 => out[0] = (value.as_f32()?.clamp(0.0, 1.0) * 255.0).round() as u8,
            Channel::Snorm8 => out[0] = (value.as_f32()?.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8,
            Channel::Uint8 => out[0] = value.as_u32()? as u8,
            Channel::Sint8 => out[0] = value.as_i32()? as i8 as u8,
            Channel::Float16 => out.copy_from_slice(bytemuck::bytes_of(&f32_to_f16(value.as_f32()?))),
            Channel::Float32 => out.copy_from_slice(bytemuck::bytes_of(&value.as_f32()?)),
            Channel::Uint32 => out.copy_from_slice(bytemuck::bytes_of(&value.as_u32()?)),
            Channel::Sint32 => out.copy_from_slice(bytemuck::bytes_of(&value.as_i32()?)),
        }
        Ok(())
    }

    fn zero(self) -> Value {
        match self {
            Channel::Uint8 | Channel::Uint32 => Value::U32(0),
            Channel::Sint8 | Channel::Sint32 => Value::I32(0),
            _ => Value::F32(0.0),
        }
    }

    fn one(self) -> Value {
        match self {
            Channel::Uint8 | Channel::Uint32 => Value::U32(1),
            Channel::Sint8 | Channel::Sint32 => Value::I32(1),
            _ => Value::F32(1.0),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextureData {
    pub data: Vec<u8>,
    /// Width, height, depth or layer count.
    pub size: [u32; 3],
    pub format: TexelFormat,
    /// Coordinate dimensions of the view, not counting the array layer.
    pub dims: usize,
    pub arrayed: bool,
}

impl TextureData {
    pub fn new(data: Vec<u8>, size: [u32; 3], format: TexelFormat) -> Self {
        TextureData {
            data,
            size,
            format,
            dims: 2,
            arrayed: false,
        }
    }

    /// Takes the view shape from a texture type name such as
    /// `texture_storage_2d_array`.
    pub fn with_view(mut self, type_name: &str) -> Self {
        self.arrayed = type_name.ends_with("_array");
        self.dims = if type_name.contains("1d") {
            1
        } else if type_name.contains("3d") {
            3
        } else {
            2
        };
        self
    }

    fn texel_offset(&self, coords: &[i64]) -> ExecResult<usize> {
        let mut index = 0usize;
        let mut scale = 1usize;
        for (axis, &c) in coords.iter().enumerate().take(3) {
            let extent = self.size[axis].max(1) as usize;
            if c < 0 || c as usize >= extent {
                return Err(ExecError::IndexOutOfBounds {
                    index: c,
                    len: extent,
                    line: 0,
                });
            }
            index += c as usize * scale;
            scale *= extent;
        }
        Ok(index * self.format.bytes_per_texel())
    }

    /// Texel at `coords` as a 4-component vector; missing channels read as
    /// `(0, 0, 0, 1)`.
    pub fn load(&self, coords: &[i64]) -> ExecResult<Value> {
        let (channel, _) = self.format.layout();
        let start = self.texel_offset(coords)?;
        let bytes = self
            .data
            .get(start..start + self.format.bytes_per_texel())
            .ok_or(ExecError::IndexOutOfBounds {
                index: start as i64,
                len: self.data.len(),
                line: 0,
            })?;
        let mut texel: Vec<Value> = bytes.chunks_exact(channel.size()).map(|c| channel.decode(c)).collect();
        if self.format == TexelFormat::Bgra8Unorm {
            texel.swap(0, 2);
        }
        while texel.len() < 4 {
            texel.push(if texel.len() == 3 { channel.one() } else { channel.zero() });
        }
        Ok(Value::Vector(texel))
    }

    pub fn store(&mut self, coords: &[i64], value: &Value) -> ExecResult<()> {
        let (channel, count) = self.format.layout();
        let start = self.texel_offset(coords)?;
        let mut parts = value.components();
        if self.format == TexelFormat::Bgra8Unorm && parts.len() >= 3 {
            parts.swap(0, 2);
        }
        let len = self.data.len();
        let out = self
            .data
            .get_mut(start..start + self.format.bytes_per_texel())
            .ok_or(ExecError::IndexOutOfBounds {
                index: start as i64,
                len,
                line: 0,
            })?;
        for (chunk, part) in out.chunks_exact_mut(channel.size()).zip(parts.iter()).take(count) {
            channel.encode(part, chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_load_normalizes() {
        let texture = TextureData::new(vec![0, 0, 0, 0, 255, 0, 51, 255], [2, 1, 1], TexelFormat::Rgba8Unorm);
        assert_eq!(
            texture.load(&[1, 0]).unwrap(),
            Value::Vector(vec![Value::F32(1.0), Value::F32(0.0), Value::F32(0.2), Value::F32(1.0)])
        );
        assert!(texture.load(&[2, 0]).is_err());
    }

    #[test]
    fn test_r32float_store_then_load() {
        let mut texture = TextureData::new(vec![0; 16], [2, 2, 1], TexelFormat::R32Float);
        texture.store(&[1, 1], &Value::F32(7.5)).unwrap();
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&texture.data);
        assert_eq!(floats, vec![0.0, 0.0, 0.0, 7.5]);
        assert_eq!(
            texture.load(&[1, 1]).unwrap(),
            Value::Vector(vec![Value::F32(7.5), Value::F32(0.0), Value::F32(0.0), Value::F32(1.0)])
        );
    }

    #[test]
    fn test_view_shape() {
        let texture = TextureData::default().with_view("texture_2d_array");
        assert_eq!((texture.dims, texture.arrayed), (2, true));
        let texture = TextureData::default().with_view("texture_storage_3d");
        assert_eq!((texture.dims, texture.arrayed), (3, false));
    }

    #[test]
    fn test_format_names() {
        assert_eq!(TexelFormat::from_name("rgba32uint"), Some(TexelFormat::Rgba32Uint));
        assert_eq!(TexelFormat::Rgba16Float.bytes_per_texel(), 8);
        assert_eq!(TexelFormat::from_name("astc"), None);
    }
}
