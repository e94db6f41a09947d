//! Byte buffers bound to resource variables, and typed reads and writes
//! through them.
//!
//! A `BufferView` is a (buffer, offset, type) triple. Reading decodes the
//! bytes at the offset into a `Value` following the type's layout; writing
//! encodes a value back in place. Views for members and elements are derived
//! from member offsets and array strides, so a shader write lands exactly
//! where the host expects it.

use crate::error::{ExecError, ExecResult};
use crate::exec::texture::TextureData;
use crate::exec::value::{swizzle_indices, TextureId, Value};
use crate::layout::{ScalarKind, TypeInfo, TypeInfoKind};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

#[derive(Debug, Clone)]
pub struct BufferView {
    pub buffer: BufferId,
    pub offset: u32,
    pub ty: Rc<TypeInfo>,
}

impl PartialEq for BufferView {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer && self.offset == other.offset && Rc::ptr_eq(&self.ty, &other.ty)
    }
}

/// What a view resolves to after one access.
pub enum ViewAccess {
    View(BufferView),
    /// Multi-component swizzle: the vector view and the picked components.
    Swizzle(BufferView, Vec<usize>),
}

impl BufferView {
    pub fn new(buffer: BufferId, ty: Rc<TypeInfo>) -> Self {
        BufferView { buffer, offset: 0, ty }
    }

    fn at(&self, offset: u32, ty: Rc<TypeInfo>) -> ExecResult<BufferView> {
        let Some(offset) = self.offset.checked_add(offset) else {
            return Err(ExecError::other(format!("offset of {} overflows 32 bits", ty.name)));
        };
        Ok(BufferView {
            buffer: self.buffer,
            offset,
            ty,
        })
    }

    /// Element `index` of an array, column of a matrix or component of a
    /// vector. `len` is the element count for runtime-sized arrays.
    pub fn element(&self, index: i64, runtime_len: Option<usize>) -> ExecResult<BufferView> {
        let (format, stride, len) = if let Some(array) = self.ty.as_array() {
            let len = array.count.map(|c| c as usize).or(runtime_len).unwrap_or(0);
            (Rc::clone(&array.format), array.stride, len)
        } else if let Some((cols, _)) = self.ty.matrix_shape() {
            // Column stride equals column alignment for every matrix shape.
            (column_type(&self.ty)?, self.ty.align, cols)
        } else if let Some(len) = self.ty.vector_len() {
            let elem = Rc::clone(self.ty.format().ok_or_else(|| ExecError::mismatch("vector without component type"))?);
            let size = elem.size;
            (elem, size, len)
        } else {
            return Err(ExecError::mismatch(format!("cannot index {}", self.ty.name)));
        };
        if index < 0 || index as usize >= len {
            return Err(ExecError::IndexOutOfBounds { index, len, line: 0 });
        }
        let offset = u32::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(stride))
            .ok_or_else(|| ExecError::other(format!("element {} of {} overflows 32 bits", index, self.ty.name)))?;
        self.at(offset, format)
    }

    pub fn member(&self, name: &str) -> ExecResult<ViewAccess> {
        if let Some(member) = self.ty.member(name) {
            return Ok(ViewAccess::View(self.at(member.offset, Rc::clone(&member.ty))?));
        }
        if let Some(len) = self.ty.vector_len() {
            let invalid = || ExecError::InvalidSwizzle {
                swizzle: name.to_string(),
                line: 0,
            };
            let indices = swizzle_indices(name).ok_or_else(invalid)?;
            if indices.iter().any(|&i| i >= len) {
                return Err(invalid());
            }
            if let [single] = indices[..] {
                return self.element(single as i64, None).map(ViewAccess::View);
            }
            return Ok(ViewAccess::Swizzle(self.clone(), indices));
        }
        Err(ExecError::mismatch(format!("{} has no member '{}'", self.ty.name, name)))
    }
}

/// Matrix columns have no type node of their own; synthesize one.
fn column_type(matrix: &TypeInfo) -> ExecResult<Rc<TypeInfo>> {
    let (_, rows) = matrix
        .matrix_shape()
        .ok_or_else(|| ExecError::mismatch(format!("{} is not a matrix", matrix.name)))?;
    let elem = matrix
        .format()
        .cloned()
        .ok_or_else(|| ExecError::mismatch("matrix without component type"))?;
    let size = rows as u32 * elem.size;
    let align = if rows == 2 { 2 * elem.size } else { 4 * elem.size };
    Ok(Rc::new(TypeInfo {
        name: format!("vec{}<{}>", rows, elem.name),
        attributes: Vec::new(),
        size,
        align,
        kind: TypeInfoKind::Template(crate::layout::TemplateInfo {
            base: format!("vec{}", rows),
            format: Some(elem),
            access: None,
            space: None,
        }),
    }))
}

/// Buffers and textures the executor owns for the length of a dispatch.
#[derive(Debug, Default)]
pub struct Memory {
    buffers: Vec<Vec<u8>>,
    textures: Vec<TextureData>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_buffer(&mut self, bytes: Vec<u8>) -> BufferId {
        self.buffers.push(bytes);
        BufferId(self.buffers.len() - 1)
    }

    /// Move a buffer's bytes out, leaving it empty.
    pub fn take_buffer(&mut self, id: BufferId) -> Vec<u8> {
        self.buffers.get_mut(id.0).map(std::mem::take).unwrap_or_default()
    }

    pub fn buffer(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(id.0).map(Vec::as_slice)
    }

    pub fn add_texture(&mut self, texture: TextureData) -> TextureId {
        self.textures.push(texture);
        TextureId(self.textures.len() - 1)
    }

    pub fn take_texture(&mut self, id: TextureId) -> Option<TextureData> {
        self.textures.get_mut(id.0).map(std::mem::take)
    }

    pub fn texture(&self, id: TextureId) -> ExecResult<&TextureData> {
        self.textures
            .get(id.0)
            .ok_or_else(|| ExecError::other(format!("texture #{} is not bound", id.0)))
    }

    pub fn texture_mut(&mut self, id: TextureId) -> ExecResult<&mut TextureData> {
        self.textures
            .get_mut(id.0)
            .ok_or_else(|| ExecError::other(format!("texture #{} is not bound", id.0)))
    }

    /// Element count of the runtime-sized array a view points at.
    pub fn runtime_len(&self, view: &BufferView) -> usize {
        let Some(array) = view.ty.as_array() else {
            return 0;
        };
        if let Some(count) = array.count {
            return count as usize;
        }
        let len = self.buffer(view.buffer).map_or(0, <[u8]>::len) as u32;
        match array.stride {
            0 => 0,
            stride => (len.saturating_sub(view.offset) / stride) as usize,
        }
    }

    pub fn element(&self, view: &BufferView, index: i64) -> ExecResult<BufferView> {
        view.element(index, Some(self.runtime_len(view)))
    }

    pub fn load(&self, view: &BufferView) -> ExecResult<Value> {
        let ty = &view.ty;
        if ty.matrix_shape().is_some() {
            let cols = (0..ty.matrix_shape().map_or(0, |(c, _)| c))
                .map(|c| {
                    let column = self.load(&view.element(c as i64, None)?)?;
                    column.components().iter().map(Value::as_f32).collect::<ExecResult<Vec<_>>>()
                })
                .collect::<ExecResult<Vec<_>>>()?;
            return Ok(Value::Matrix(cols));
        }
        if let Some(len) = ty.vector_len() {
            let items = (0..len)
                .map(|i| self.load(&view.element(i as i64, None)?))
                .collect::<ExecResult<Vec<_>>>()?;
            return Ok(Value::Vector(items));
        }
        match &ty.kind {
            TypeInfoKind::Scalar(kind) => self.load_scalar(view, *kind),
            TypeInfoKind::Template(t) if t.base == "atomic" => {
                self.load_scalar(view, ty.scalar_kind().unwrap_or(ScalarKind::U32))
            }
            TypeInfoKind::Array(_) => {
                let len = self.runtime_len(view);
                let items = (0..len)
                    .map(|i| self.load(&view.element(i as i64, Some(len))?))
                    .collect::<ExecResult<Vec<_>>>()?;
                Ok(Value::Array(items))
            }
            TypeInfoKind::Struct(s) => {
                let fields = s
                    .members
                    .iter()
                    .map(|m| Ok((m.name.clone(), self.load(&view.at(m.offset, Rc::clone(&m.ty))?)?)))
                    .collect::<ExecResult<Vec<_>>>()?;
                Ok(Value::Struct {
                    name: ty.name.clone(),
                    fields,
                })
            }
            _ => Err(ExecError::mismatch(format!("{} cannot be read from a buffer", ty.name))),
        }
    }

    pub fn store(&mut self, view: &BufferView, value: &Value) -> ExecResult<()> {
        let ty = Rc::clone(&view.ty);
        if ty.matrix_shape().is_some() || ty.vector_len().is_some() {
            let count = ty.matrix_shape().map_or_else(|| ty.vector_len().unwrap_or(0), |(c, _)| c);
            let parts: Vec<Value> = match value {
                Value::Matrix(cols) => cols
                    .iter()
                    .map(|c| Value::Vector(c.iter().map(|v| Value::F32(*v)).collect()))
                    .collect(),
                Value::Vector(items) => items.clone(),
                scalar if scalar.is_scalar() => vec![scalar.clone(); count],
                other => return Err(ExecError::mismatch(format!("cannot store {} into {}", other.type_name(), ty.name))),
            };
            if parts.len() != count {
                return Err(ExecError::VectorLength {
                    left: count,
                    right: parts.len(),
                    line: 0,
                });
            }
            for (i, part) in parts.iter().enumerate() {
                self.store(&view.element(i as i64, None)?, part)?;
            }
            return Ok(());
        }
        match (&ty.kind, value) {
            (TypeInfoKind::Scalar(kind), _) => self.store_scalar(view, *kind, value),
            (TypeInfoKind::Template(t), _) if t.base == "atomic" => {
                self.store_scalar(view, ty.scalar_kind().unwrap_or(ScalarKind::U32), value)
            }
            (TypeInfoKind::Array(_), Value::Array(items)) => {
                let len = self.runtime_len(view).min(items.len());
                for (i, item) in items.iter().take(len).enumerate() {
                    let element = view.element(i as i64, Some(len))?;
                    self.store(&element, item)?;
                }
                Ok(())
            }
            (TypeInfoKind::Struct(s), Value::Struct { fields, .. }) => {
                for member in &s.members {
                    if let Some((_, field)) = fields.iter().find(|(n, _)| *n == member.name) {
                        self.store(&view.at(member.offset, Rc::clone(&member.ty))?, field)?;
                    }
                }
                Ok(())
            }
            _ => Err(ExecError::mismatch(format!(
                "cannot store {} into {}",
                value.type_name(),
                ty.name
            ))),
        }
    }

    fn bytes(&self, view: &BufferView, size: usize) -> ExecResult<&[u8]> {
        let buffer = self
            .buffers
            .get(view.buffer.0)
            .ok_or_else(|| ExecError::other("buffer is not bound"))?;
        let start = view.offset as usize;
        buffer.get(start..start + size).ok_or(ExecError::IndexOutOfBounds {
            index: start as i64,
            len: buffer.len(),
            line: 0,
        })
    }

    fn bytes_mut(&mut self, view: &BufferView, size: usize) -> ExecResult<&mut [u8]> {
        let buffer = self
            .buffers
            .get_mut(view.buffer.0)
            .ok_or_else(|| ExecError::other("buffer is not bound"))?;
        let start = view.offset as usize;
        let len = buffer.len();
        buffer.get_mut(start..start + size).ok_or(ExecError::IndexOutOfBounds {
            index: start as i64,
            len,
            line: 0,
        })
    }

    fn load_scalar(&self, view: &BufferView, kind: ScalarKind) -> ExecResult<Value> {
        let bytes = self.bytes(view, kind.size() as usize)?;
        Ok(match kind {
            ScalarKind::Bool => Value::Bool(bytemuck::pod_read_unaligned::<u32>(bytes) != 0),
            ScalarKind::I32 => Value::I32(bytemuck::pod_read_unaligned(bytes)),
            ScalarKind::U32 => Value::U32(bytemuck::pod_read_unaligned(bytes)),
            ScalarKind::F32 => Value::F32(bytemuck::pod_read_unaligned(bytes)),
            ScalarKind::F16 => Value::F32(f16_to_f32(bytemuck::pod_read_unaligned(bytes))),
        })
    }

    fn store_scalar(&mut self, view: &BufferView, kind: ScalarKind, value: &Value) -> ExecResult<()> {
        let bytes = self.bytes_mut(view, kind.size() as usize)?;
        match kind {
            ScalarKind::Bool => bytes.copy_from_slice(bytemuck::bytes_of(&(value.as_bool()? as u32))),
            ScalarKind::I32 => bytes.copy_from_slice(bytemuck::bytes_of(&value.as_i32()?)),
            ScalarKind::U32 => bytes.copy_from_slice(bytemuck::bytes_of(&value.as_u32()?)),
            ScalarKind::F32 => bytes.copy_from_slice(bytemuck::bytes_of(&value.as_f32()?)),
            ScalarKind::F16 => bytes.copy_from_slice(bytemuck::bytes_of(&f32_to_f16(value.as_f32()?))),
        }
        Ok(())
    }
}

/// IEEE half to single precision.
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) as u32) << 31;
    let exp = ((bits >> 10) & 0x1f) as u32;
    let mant = (bits & 0x3ff) as u32;
    let out = match (exp, mant) {
        (0, 0) => sign,
        (0, _) => {
            // Subnormal: normalize the mantissa.
            let shift = mant.leading_zeros() - 21;
            let mant = (mant << shift) & 0x3ff;
            let exp = 127 - 15 - shift + 1;
            sign | (exp << 23) | (mant << 13)
        }
        (0x1f, 0) => sign | 0x7f80_0000,
        (0x1f, _) => sign | 0x7fc0_0000 | (mant << 13),
        _ => sign | ((exp + 127 - 15) << 23) | (mant << 13),
    };
    f32::from_bits(out)
}

/// Single to half precision, rounding to nearest even.
pub fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x7f_ffff;

    if exp == 0xff {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let half_exp = exp - 127 + 15;
    if half_exp >= 0x1f {
        return sign | 0x7c00;
    }
    if half_exp <= 0 {
        if half_exp < -10 {
            return sign;
        }
        let mant = mant | 0x80_0000;
        let shift = (14 - half_exp) as u32;
        let half = mant >> shift;
        let rest = mant & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        let round = rest > halfway || (rest == halfway && half & 1 == 1);
        return sign | (half + round as u32) as u16;
    }
    let half = ((half_exp as u32) << 10) | (mant >> 13);
    let rest = mant & 0x1fff;
    let round = rest > 0x1000 || (rest == 0x1000 && half & 1 == 1);
    sign | (half + round as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TypeCache;
    use crate::parser::parse_source;

    fn struct_type(source: &str, name: &str) -> Rc<TypeInfo> {
        let program = parse_source(source).unwrap();
        TypeCache::new(&program).struct_info(name).unwrap()
    }

    #[test]
    fn test_struct_round_trip_through_bytes() {
        let ty = struct_type("struct S { a: f32, b: vec3<u32>, c: i32 }", "S");
        assert_eq!(ty.size, 32);

        let mut memory = Memory::new();
        let id = memory.add_buffer(vec![0; 32]);
        let view = BufferView::new(id, Rc::clone(&ty));
        let value = Value::Struct {
            name: "S".to_string(),
            fields: vec![
                ("a".to_string(), Value::F32(1.5)),
                ("b".to_string(), Value::Vector(vec![Value::U32(1), Value::U32(2), Value::U32(3)])),
                ("c".to_string(), Value::I32(-4)),
            ],
        };
        memory.store(&view, &value).unwrap();

        let words: Vec<u32> = bytemuck::pod_collect_to_vec(memory.buffer(id).unwrap());
        assert_eq!(words[0], 1.5f32.to_bits());
        assert_eq!(&words[4..7], &[1, 2, 3]);
        assert_eq!(words[7] as i32, -4);
        assert_eq!(memory.load(&view).unwrap(), value);
    }

    #[test]
    fn test_element_offset_past_32_bits_is_an_error() {
        let ty = struct_type("struct S { a: array<vec4<f32>, 300000000> }", "S");
        let mut memory = Memory::new();
        let id = memory.add_buffer(vec![0; 16]);
        let view = BufferView::new(id, ty);
        let ViewAccess::View(array) = view.member("a").unwrap() else {
            panic!("member is not a view");
        };
        assert!(array.element(1, None).is_ok());
        let err = array.element(299_999_999, None).unwrap_err();
        assert!(matches!(err, ExecError::Other { .. }), "{:?}", err);
    }

    #[test]
    fn test_runtime_array_length_follows_buffer() {
        let ty = struct_type("struct S { n: u32, data: array<f32> }", "S");
        let mut memory = Memory::new();
        let id = memory.add_buffer(bytemuck::cast_slice(&[3u32, 0, 0, 0]).to_vec());
        let ViewAccess::View(data) = BufferView::new(id, ty).member("data").unwrap() else {
            panic!("expected a member view");
        };
        assert_eq!(memory.runtime_len(&data), 3);
        assert!(matches!(
            memory.element(&data, 3),
            Err(ExecError::IndexOutOfBounds { index: 3, len: 3, .. })
        ));
    }

    #[test]
    fn test_swizzle_view() {
        let ty = struct_type("struct S { v: vec4<f32> }", "S");
        let mut memory = Memory::new();
        let id = memory.add_buffer(bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]).to_vec());
        let ViewAccess::View(v) = BufferView::new(id, ty).member("v").unwrap() else {
            panic!("expected a member view");
        };
        let ViewAccess::View(z) = v.member("z").unwrap() else {
            panic!("single component is a view");
        };
        assert_eq!(memory.load(&z).unwrap(), Value::F32(3.0));
        assert!(matches!(v.member("xyq"), Err(ExecError::InvalidSwizzle { .. })));
    }

    #[test]
    fn test_half_precision_conversion() {
        assert_eq!(f32_to_f16(1.0), 0x3c00);
        assert_eq!(f32_to_f16(-2.0), 0xc000);
        assert_eq!(f16_to_f32(0x3c00), 1.0);
        assert_eq!(f16_to_f32(0x3555), 0.333_251_95);
        assert_eq!(f16_to_f32(f32_to_f16(65504.0)), 65504.0);
        assert!(f16_to_f32(0x7c00).is_infinite());
        assert_eq!(f16_to_f32(0x0001), 2f32.powi(-24));
    }
}
