//! Runtime values and places.

use crate::error::{ExecError, ExecResult};
use crate::exec::memory::BufferView;
use crate::layout::{ScalarKind, TypeInfo, TypeInfoKind};
use crate::scope::ScopeId;
use std::fmt;

/// Index of a texture held in executor memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Result of a call that returns nothing, and the neutral value handed
    /// back after a reported error.
    Void,
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    Vector(Vec<Value>),
    /// Column-major: `columns[c][r]`.
    Matrix(Vec<Vec<f32>>),
    Array(Vec<Value>),
    Struct {
        name: String,
        fields: Vec<(String, Value)>,
    },
    Pointer(Place),
    Texture(TextureId),
    Sampler,
}

/// Where a variable lives: owned by a scope, or a view into a bound buffer.
#[derive(Debug, Clone)]
pub enum Slot {
    Value(Value),
    View(BufferView),
}

/// An assignable location: a root variable and a path of accesses below it.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub root: PlaceRoot,
    pub path: Vec<Access>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceRoot {
    Local { scope: ScopeId, name: String },
    Buffer(BufferView),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Index(i64),
    /// Struct member, or a swizzle when applied to a vector.
    Member(String),
}

impl Place {
    pub fn local(scope: ScopeId, name: impl Into<String>) -> Self {
        Place {
            root: PlaceRoot::Local {
                scope,
                name: name.into(),
            },
            path: Vec::new(),
        }
    }

    pub fn buffer(view: BufferView) -> Self {
        Place {
            root: PlaceRoot::Buffer(view),
            path: Vec::new(),
        }
    }

    pub fn with(mut self, access: Access) -> Self {
        self.path.push(access);
        self
    }
}

/// Component indices of a 1-4 letter swizzle drawn from one of the sets
/// `xyzw` or `rgba`.
pub fn swizzle_indices(swizzle: &str) -> Option<Vec<usize>> {
    if swizzle.is_empty() || swizzle.len() > 4 {
        return None;
    }
    for set in ["xyzw", "rgba"] {
        let indices: Option<Vec<usize>> = swizzle.chars().map(|c| set.find(c)).collect();
        if indices.is_some() {
            return indices;
        }
    }
    None
}

impl Value {
    pub fn zero(kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::I32 => Value::I32(0),
            ScalarKind::U32 => Value::U32(0),
            ScalarKind::F32 | ScalarKind::F16 => Value::F32(0.0),
        }
    }

    /// A host-supplied number as a scalar of `kind`. Integer kinds saturate.
    pub fn from_f64(number: f64, kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Bool => Value::Bool(number != 0.0),
            ScalarKind::I32 => Value::I32(number as i32),
            ScalarKind::U32 => Value::U32(number as u32),
            ScalarKind::F32 | ScalarKind::F16 => Value::F32(number as f32),
        }
    }

    /// The zero value of a laid-out type. Runtime-sized arrays start empty.
    pub fn zero_of(ty: &TypeInfo) -> Value {
        if let Some((cols, rows)) = ty.matrix_shape() {
            return Value::Matrix(vec![vec![0.0; rows]; cols]);
        }
        if let Some(len) = ty.vector_len() {
            let kind = ty.scalar_kind().unwrap_or(ScalarKind::F32);
            return Value::Vector(vec![Value::zero(kind); len]);
        }
        match &ty.kind {
            TypeInfoKind::Scalar(kind) => Value::zero(*kind),
            TypeInfoKind::Array(array) => {
                let count = array.count.unwrap_or(0) as usize;
                Value::Array(vec![Value::zero_of(&array.format); count])
            }
            TypeInfoKind::Struct(s) => Value::Struct {
                name: ty.name.clone(),
                fields: s
                    .members
                    .iter()
                    .map(|m| (m.name.clone(), Value::zero_of(&m.ty)))
                    .collect(),
            },
            TypeInfoKind::Template(t) if t.base == "atomic" => {
                Value::zero(ty.scalar_kind().unwrap_or(ScalarKind::U32))
            }
            TypeInfoKind::Opaque if ty.name.starts_with("sampler") => Value::Sampler,
            _ => Value::Void,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Void => "void".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::I32(_) => "i32".to_string(),
            Value::U32(_) => "u32".to_string(),
            Value::F32(_) => "f32".to_string(),
            Value::Vector(items) => format!(
                "vec{}<{}>",
                items.len(),
                items.first().map_or("f32".to_string(), Value::type_name)
            ),
            Value::Matrix(cols) => format!("mat{}x{}<f32>", cols.len(), cols.first().map_or(0, Vec::len)),
            Value::Array(items) => format!(
                "array<{}, {}>",
                items.first().map_or("?".to_string(), Value::type_name),
                items.len()
            ),
            Value::Struct { name, .. } => name.clone(),
            Value::Pointer(_) => "ptr".to_string(),
            Value::Texture(_) => "texture".to_string(),
            Value::Sampler => "sampler".to_string(),
        }
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Bool(_) => Some(ScalarKind::Bool),
            Value::I32(_) => Some(ScalarKind::I32),
            Value::U32(_) => Some(ScalarKind::U32),
            Value::F32(_) => Some(ScalarKind::F32),
            Value::Vector(items) => items.first().and_then(Value::scalar_kind),
            Value::Matrix(_) => Some(ScalarKind::F32),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::I32(_) | Value::U32(_) | Value::F32(_))
    }

    pub fn as_f32(&self) -> ExecResult<f32> {
        match self {
            Value::F32(v) => Ok(*v),
            Value::I32(v) => Ok(*v as f32),
            Value::U32(v) => Ok(*v as f32),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(ExecError::mismatch(format!("expected a number, found {}", other.type_name()))),
        }
    }

    pub fn as_i64(&self) -> ExecResult<i64> {
        match self {
            Value::I32(v) => Ok(*v as i64),
            Value::U32(v) => Ok(*v as i64),
            Value::F32(v) => Ok(*v as i64),
            Value::Bool(b) => Ok(*b as i64),
            other => Err(ExecError::mismatch(format!("expected an integer, found {}", other.type_name()))),
        }
    }

    pub fn as_i32(&self) -> ExecResult<i32> {
        match self {
            Value::U32(v) => Ok(*v as i32),
            Value::F32(v) => Ok(*v as i32),
            other => other.as_i64().map(|v| v as i32),
        }
    }

    pub fn as_u32(&self) -> ExecResult<u32> {
        match self {
            Value::I32(v) => Ok(*v as u32),
            Value::F32(v) => Ok(*v as u32),
            other => other.as_i64().map(|v| v as u32),
        }
    }

    pub fn as_bool(&self) -> ExecResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::I32(v) => Ok(*v != 0),
            Value::U32(v) => Ok(*v != 0),
            Value::F32(v) => Ok(*v != 0.0),
            other => Err(ExecError::mismatch(format!("expected a bool, found {}", other.type_name()))),
        }
    }

    /// Vector components, or the value itself for a scalar.
    pub fn components(&self) -> Vec<Value> {
        match self {
            Value::Vector(items) => items.clone(),
            Value::Matrix(cols) => cols.iter().flatten().map(|v| Value::F32(*v)).collect(),
            other => vec![other.clone()],
        }
    }

    pub fn vector_len(&self) -> Option<usize> {
        match self {
            Value::Vector(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Apply `f` to every component of a vector, or to a scalar directly.
    pub fn map(&self, mut f: impl FnMut(&Value) -> ExecResult<Value>) -> ExecResult<Value> {
        match self {
            Value::Vector(items) => Ok(Value::Vector(items.iter().map(&mut f).collect::<ExecResult<_>>()?)),
            other => f(other),
        }
    }

    /// Numeric conversion to `kind`, componentwise for vectors.
    pub fn convert(&self, kind: ScalarKind) -> ExecResult<Value> {
        self.map(|v| {
            Ok(match kind {
                ScalarKind::Bool => Value::Bool(v.as_bool()?),
                ScalarKind::I32 => Value::I32(v.as_i32()?),
                ScalarKind::U32 => Value::U32(v.as_u32()?),
                ScalarKind::F32 | ScalarKind::F16 => Value::F32(v.as_f32()?),
            })
        })
    }

    /// Convert to the shape of `ty` where the two are compatible: scalars and
    /// vector components take the declared kind, everything else is kept.
    pub fn coerce_to(self, ty: &TypeInfo) -> ExecResult<Value> {
        let Some(kind) = ty.scalar_kind() else {
            return Ok(self);
        };
        match (self.vector_len(), ty.vector_len()) {
            (Some(found), Some(len)) if found != len => Err(ExecError::VectorLength {
                left: len,
                right: found,
                line: 0,
            }),
            (Some(_), Some(_)) => self.convert(kind),
            (None, Some(len)) if self.is_scalar() => Ok(Value::Vector(vec![self.convert(kind)?; len])),
            (None, None) if self.is_scalar() && ty.matrix_shape().is_none() => self.convert(kind),
            _ => Ok(self),
        }
    }

    /// Convert to the kind of `like`, used when assigning over an existing
    /// value.
    pub fn coerce_like(self, like: &Value) -> ExecResult<Value> {
        let compatible = match (like.vector_len(), self.vector_len()) {
            (Some(old), Some(new)) if old != new => {
                return Err(ExecError::VectorLength {
                    left: old,
                    right: new,
                    line: 0,
                })
            }
            (Some(_), Some(_)) => true,
            (None, None) => like.is_scalar() && self.is_scalar(),
            _ => false,
        };
        match (compatible, like.scalar_kind(), self.scalar_kind()) {
            (true, Some(kind), Some(found)) if kind != found => self.convert(kind),
            _ => Ok(self),
        }
    }

    pub fn swizzle(&self, swizzle: &str) -> ExecResult<Value> {
        let Value::Vector(items) = self else {
            return Err(ExecError::mismatch(format!(
                "cannot swizzle '{}' on {}",
                swizzle,
                self.type_name()
            )));
        };
        let invalid = || ExecError::InvalidSwizzle {
            swizzle: swizzle.to_string(),
            line: 0,
        };
        let indices = swizzle_indices(swizzle).ok_or_else(invalid)?;
        let picked = indices
            .iter()
            .map(|&i| items.get(i).cloned().ok_or_else(invalid))
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(match picked.len() {
            1 => picked.into_iter().next().unwrap_or(Value::Void),
            _ => Value::Vector(picked),
        })
    }

    /// Read one access below this value.
    pub fn access(&self, access: &Access) -> ExecResult<Value> {
        match (self, access) {
            (Value::Struct { fields, name }, Access::Member(member)) => fields
                .iter()
                .find(|(n, _)| n == member)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ExecError::mismatch(format!("struct {} has no member '{}'", name, member))),
            (Value::Vector(_), Access::Member(swizzle)) => self.swizzle(swizzle),
            (Value::Vector(items) | Value::Array(items), Access::Index(i)) => {
                index(items.len(), *i).map(|i| items[i].clone())
            }
            (Value::Matrix(cols), Access::Index(i)) => {
                index(cols.len(), *i).map(|i| Value::Vector(cols[i].iter().map(|v| Value::F32(*v)).collect()))
            }
            (other, _) => Err(ExecError::mismatch(format!("cannot access {:?} on {}", access, other.type_name()))),
        }
    }

    pub fn get_path(&self, path: &[Access]) -> ExecResult<Value> {
        let mut current = self.clone();
        for access in path {
            current = current.access(access)?;
        }
        Ok(current)
    }

    /// Overwrite the value at `path`, converting to the kind already stored
    /// there.
    pub fn set_path(&mut self, path: &[Access], value: Value) -> ExecResult<()> {
        let Some((last, parents)) = path.split_last() else {
            let value = value.coerce_like(self)?;
            *self = value;
            return Ok(());
        };
        let mut target = self;
        for access in parents {
            target = target.access_mut(access)?;
        }
        match (target, last) {
            (Value::Vector(items), Access::Member(swizzle)) => {
                let indices = swizzle_indices(swizzle).ok_or_else(|| ExecError::InvalidSwizzle {
                    swizzle: swizzle.clone(),
                    line: 0,
                })?;
                let parts = value.components();
                if parts.len() != indices.len() {
                    return Err(ExecError::VectorLength {
                        left: indices.len(),
                        right: parts.len(),
                        line: 0,
                    });
                }
                for (&i, part) in indices.iter().zip(parts) {
                    let slot = items.get_mut(i).ok_or_else(|| ExecError::InvalidSwizzle {
                        swizzle: swizzle.clone(),
                        line: 0,
                    })?;
                    let part = part.coerce_like(slot)?;
                    *slot = part;
                }
                Ok(())
            }
            (Value::Matrix(cols), Access::Index(i)) => {
                let i = index(cols.len(), *i)?;
                let column = value
                    .components()
                    .iter()
                    .map(Value::as_f32)
                    .collect::<ExecResult<Vec<_>>>()?;
                if column.len() != cols[i].len() {
                    return Err(ExecError::VectorLength {
                        left: cols[i].len(),
                        right: column.len(),
                        line: 0,
                    });
                }
                cols[i] = column;
                Ok(())
            }
            (target, last) => {
                let slot = target.access_mut(last)?;
                let value = value.coerce_like(slot)?;
                *slot = value;
                Ok(())
            }
        }
    }

    fn access_mut(&mut self, access: &Access) -> ExecResult<&mut Value> {
        let type_name = self.type_name();
        match (self, access) {
            (Value::Struct { fields, .. }, Access::Member(member)) => fields
                .iter_mut()
                .find(|(n, _)| n == member)
                .map(|(_, v)| v)
                .ok_or_else(|| ExecError::mismatch(format!("struct {} has no member '{}'", type_name, member))),
            (Value::Vector(items), Access::Member(swizzle)) => match swizzle_indices(swizzle).as_deref() {
                Some(&[i]) if i < items.len() => Ok(&mut items[i]),
                _ => Err(ExecError::InvalidSwizzle {
                    swizzle: swizzle.clone(),
                    line: 0,
                }),
            },
            (Value::Vector(items) | Value::Array(items), Access::Index(i)) => {
                let i = index(items.len(), *i)?;
                Ok(&mut items[i])
            }
            (_, access) => Err(ExecError::mismatch(format!("cannot assign through {:?} on {}", access, type_name))),
        }
    }
}

fn index(len: usize, i: i64) -> ExecResult<usize> {
    if i < 0 || i as usize >= len {
        return Err(ExecError::IndexOutOfBounds { index: i, len, line: 0 });
    }
    Ok(i as usize)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}u", v),
            Value::F32(v) => write!(f, "{:?}", v),
            Value::Vector(items) | Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Matrix(cols) => {
                write!(f, "[")?;
                for (i, col) in cols.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", col)?;
                }
                write!(f, "]")
            }
            Value::Struct { name, fields } => {
                write!(f, "{} {{ ", name)?;
                for (i, (field, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field, value)?;
                }
                write!(f, " }}")
            }
            Value::Pointer(_) => write!(f, "ptr"),
            Value::Texture(id) => write!(f, "texture#{}", id.0),
            Value::Sampler => write!(f, "sampler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec4(values: [f32; 4]) -> Value {
        Value::Vector(values.iter().map(|v| Value::F32(*v)).collect())
    }

    #[test]
    fn test_swizzle_reorders_components() {
        let v = vec4([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            v.swizzle("wzy").unwrap(),
            Value::Vector(vec![Value::F32(4.0), Value::F32(3.0), Value::F32(2.0)])
        );
        assert_eq!(v.swizzle("g").unwrap(), Value::F32(2.0));
    }

    #[test]
    fn test_invalid_swizzle_is_an_error() {
        let v = vec4([1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(v.swizzle("xq"), Err(ExecError::InvalidSwizzle { .. })));
        assert!(matches!(v.swizzle("xr"), Err(ExecError::InvalidSwizzle { .. })));
        assert!(matches!(v.swizzle("xyzwx"), Err(ExecError::InvalidSwizzle { .. })));
        let short = Value::Vector(vec![Value::F32(1.0), Value::F32(2.0)]);
        assert!(matches!(short.swizzle("z"), Err(ExecError::InvalidSwizzle { .. })));
    }

    #[test]
    fn test_set_path_through_struct_and_swizzle() {
        let mut s = Value::Struct {
            name: "S".to_string(),
            fields: vec![("v".to_string(), vec4([0.0; 4]))],
        };
        s.set_path(&[Access::Member("v".into()), Access::Member("zx".into())], vec4([5.0, 6.0, 0.0, 0.0]))
            .unwrap_err();
        s.set_path(
            &[Access::Member("v".into()), Access::Member("zx".into())],
            Value::Vector(vec![Value::F32(5.0), Value::I32(6)]),
        )
        .unwrap();
        assert_eq!(
            s.get_path(&[Access::Member("v".into())]).unwrap(),
            vec4([6.0, 0.0, 5.0, 0.0])
        );
    }

    #[test]
    fn test_index_out_of_bounds() {
        let a = Value::Array(vec![Value::I32(1)]);
        assert!(matches!(
            a.access(&Access::Index(3)),
            Err(ExecError::IndexOutOfBounds { index: 3, len: 1, .. })
        ));
        assert!(a.access(&Access::Index(-1)).is_err());
    }

    #[test]
    fn test_assignment_keeps_declared_kind() {
        let mut v = Value::F32(0.0);
        v.set_path(&[], Value::I32(3)).unwrap();
        assert_eq!(v, Value::F32(3.0));
    }
}
