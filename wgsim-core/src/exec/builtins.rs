//! The built-in function library.
//!
//! Every numeric built-in maps componentwise over vector arguments and
//! broadcasts scalar arguments against vectors. Synchronization, derivative
//! and subgroup functions behave as they would for a lone invocation.

use crate::ast::BinaryOp;
use crate::bail_mismatch;
use crate::error::{ExecError, ExecResult};
use crate::exec::memory::{f16_to_f32, f32_to_f16};
use crate::exec::ops;
use crate::exec::value::{Place, Value};
use crate::exec::Executor;
use crate::layout::ScalarKind;
use log::trace;

pub(crate) fn call(exec: &mut Executor, name: &str, args: Vec<Value>) -> ExecResult<Value> {
    trace!("builtin {}({} args)", name, args.len());
    exec.builtins().check_arity(name, args.len())?;

    match name {
        // Trigonometric, exponential and rounding functions on floats.
        "acos" => float1(&args[0], f32::acos),
        "acosh" => float1(&args[0], f32::acosh),
        "asin" => float1(&args[0], f32::asin),
        "asinh" => float1(&args[0], f32::asinh),
        "atan" => float1(&args[0], f32::atan),
        "atanh" => float1(&args[0], f32::atanh),
        "ceil" => float1(&args[0], f32::ceil),
        "cos" => float1(&args[0], f32::cos),
        "cosh" => float1(&args[0], f32::cosh),
        "degrees" => float1(&args[0], f32::to_degrees),
        "exp" => float1(&args[0], f32::exp),
        "exp2" => float1(&args[0], f32::exp2),
        "floor" => float1(&args[0], f32::floor),
        "fract" => float1(&args[0], |x| x - x.floor()),
        "inverseSqrt" => float1(&args[0], |x| 1.0 / x.sqrt()),
        "log" => float1(&args[0], f32::ln),
        "log2" => float1(&args[0], f32::log2),
        "quantizeToF16" => float1(&args[0], |x| f16_to_f32(f32_to_f16(x))),
        "radians" => float1(&args[0], f32::to_radians),
        "round" => float1(&args[0], f32::round_ties_even),
        "saturate" => float1(&args[0], |x| x.clamp(0.0, 1.0)),
        "sin" => float1(&args[0], f32::sin),
        "sinh" => float1(&args[0], f32::sinh),
        "sqrt" => float1(&args[0], f32::sqrt),
        "tan" => float1(&args[0], f32::tan),
        "tanh" => float1(&args[0], f32::tanh),
        "trunc" => float1(&args[0], f32::trunc),
        "abs" => args[0].map(|v| {
            Ok(match v {
                Value::I32(x) => Value::I32(x.wrapping_abs()),
                Value::U32(x) => Value::U32(*x),
                other => Value::F32(other.as_f32()?.abs()),
            })
        }),
        "sign" => args[0].map(|v| {
            Ok(match v {
                Value::I32(x) => Value::I32(x.signum()),
                other => {
                    let x = other.as_f32()?;
                    Value::F32(if x == 0.0 { 0.0 } else { x.signum() })
                }
            })
        }),
        "atan2" => float2(&args[0], &args[1], f32::atan2),
        "pow" => float2(&args[0], &args[1], f32::powf),
        "step" => float2(&args[0], &args[1], |edge, x| if x >= edge { 1.0 } else { 0.0 }),
        "ldexp" => zip2(&args[0], &args[1], |e, p| Ok(Value::F32(e.as_f32()? * 2f32.powi(p.as_i32()?)))),
        "max" => zip2(&args[0], &args[1], |a, b| min_max(a, b, true)),
        "min" => zip2(&args[0], &args[1], |a, b| min_max(a, b, false)),
        "clamp" => {
            let low = zip2(&args[0], &args[1], |a, b| min_max(a, b, true))?;
            zip2(&low, &args[2], |a, b| min_max(a, b, false))
        }
        "fma" => zip3(&args[0], &args[1], &args[2], |a, b, c| {
            Ok(Value::F32(a.as_f32()?.mul_add(b.as_f32()?, c.as_f32()?)))
        }),
        "mix" => zip3(&args[0], &args[1], &args[2], |a, b, t| {
            let (a, b, t) = (a.as_f32()?, b.as_f32()?, t.as_f32()?);
            Ok(Value::F32(a * (1.0 - t) + b * t))
        }),
        "smoothstep" => zip3(&args[0], &args[1], &args[2], |lo, hi, x| {
            let (lo, hi, x) = (lo.as_f32()?, hi.as_f32()?, x.as_f32()?);
            let t = ((x - lo) / (hi - lo)).clamp(0.0, 1.0);
            Ok(Value::F32(t * t * (3.0 - 2.0 * t)))
        }),
        "select" => select(&args[0], &args[1], &args[2]),
        "all" => Ok(Value::Bool(
            args[0].components().iter().map(Value::as_bool).collect::<ExecResult<Vec<_>>>()?.iter().all(|b| *b),
        )),
        "any" => Ok(Value::Bool(
            args[0].components().iter().map(Value::as_bool).collect::<ExecResult<Vec<_>>>()?.iter().any(|b| *b),
        )),
        "frexp" => frexp(&args[0]),
        "modf" => modf(&args[0]),

        "dpdx" | "dpdxCoarse" | "dpdxFine" | "dpdy" | "dpdyCoarse" | "dpdyFine" | "fwidth" | "fwidthCoarse"
        | "fwidthFine" => float1(&args[0], |_| 0.0),

        "countLeadingZeros" => int1(&args[0], |x| x.leading_zeros()),
        "countOneBits" => int1(&args[0], |x| x.count_ones()),
        "countTrailingZeros" => int1(&args[0], |x| x.trailing_zeros()),
        "reverseBits" => int1(&args[0], u32::reverse_bits),
        "firstLeadingBit" => args[0].map(first_leading_bit),
        "firstTrailingBit" => int1(&args[0], |x| if x == 0 { u32::MAX } else { x.trailing_zeros() }),
        "extractBits" => {
            let (offset, count) = (args[1].as_u32()?, args[2].as_u32()?);
            args[0].map(|v| extract_bits(v, offset, count))
        }
        "insertBits" => {
            let (offset, count) = (args[2].as_u32()?, args[3].as_u32()?);
            zip2(&args[0], &args[1], |e, new| insert_bits(e, new, offset, count))
        }

        "dot" => dot(&args[0], &args[1]),
        "length" => Ok(Value::F32(length(&args[0])?)),
        "distance" => Ok(Value::F32(length(&ops::binary(BinaryOp::Subtract, &args[0], &args[1])?)?)),
        "normalize" => {
            let len = length(&args[0])?;
            float1(&args[0], |x| x / len)
        }
        "cross" => cross(&args[0], &args[1]),
        "reflect" => {
            let d = dot(&args[1], &args[0])?.as_f32()?;
            let scaled = ops::binary(BinaryOp::Multiply, &args[1], &Value::F32(2.0 * d))?;
            ops::binary(BinaryOp::Subtract, &args[0], &scaled)
        }
        "faceForward" => {
            if dot(&args[1], &args[2])?.as_f32()? < 0.0 {
                Ok(args[0].clone())
            } else {
                ops::unary(crate::ast::UnaryOp::Negate, &args[0])
            }
        }
        "refract" => refract(&args[0], &args[1], args[2].as_f32()?),
        "transpose" => transpose(&args[0]),
        "determinant" => determinant(&args[0]),

        "arrayLength" => {
            let place = pointer(&args[0], name)?;
            Ok(Value::U32(exec.runtime_array_len(&place)? as u32))
        }

        "atomicLoad" | "workgroupUniformLoad" => exec.read_place(&pointer(&args[0], name)?),
        "atomicStore" => {
            exec.write_place(&pointer(&args[0], name)?, args[1].clone())?;
            Ok(Value::Void)
        }
        "atomicAdd" | "atomicSub" | "atomicMax" | "atomicMin" | "atomicAnd" | "atomicOr" | "atomicXor"
        | "atomicExchange" => {
            let place = pointer(&args[0], name)?;
            let old = exec.read_place(&place)?;
            let new = match name {
                "atomicAdd" => ops::binary(BinaryOp::Add, &old, &args[1])?,
                "atomicSub" => ops::binary(BinaryOp::Subtract, &old, &args[1])?,
                "atomicMax" => min_max(&old, &args[1], true)?,
                "atomicMin" => min_max(&old, &args[1], false)?,
                "atomicAnd" => ops::binary(BinaryOp::BitAnd, &old, &args[1])?,
                "atomicOr" => ops::binary(BinaryOp::BitOr, &old, &args[1])?,
                "atomicXor" => ops::binary(BinaryOp::BitXor, &old, &args[1])?,
                _ => args[1].clone(),
            };
            exec.write_place(&place, new)?;
            Ok(old)
        }
        "atomicCompareExchangeWeak" => {
            let place = pointer(&args[0], name)?;
            let old = exec.read_place(&place)?;
            let exchanged = ops::binary(BinaryOp::Equal, &old, &args[1])?.as_bool()?;
            if exchanged {
                exec.write_place(&place, args[2].clone())?;
            }
            let kind = old.scalar_kind().unwrap_or(ScalarKind::U32);
            Ok(Value::Struct {
                name: format!("__atomic_compare_exchange_result_{}", kind.name()),
                fields: vec![
                    ("old_value".to_string(), old),
                    ("exchanged".to_string(), Value::Bool(exchanged)),
                ],
            })
        }

        "pack4x8snorm" => pack(&args[0], 8, |x| (x.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8 as u32),
        "pack4x8unorm" => pack(&args[0], 8, |x| (x.clamp(0.0, 1.0) * 255.0).round() as u32),
        "pack2x16snorm" => pack(&args[0], 16, |x| (x.clamp(-1.0, 1.0) * 32767.0).round() as i16 as u16 as u32),
        "pack2x16unorm" => pack(&args[0], 16, |x| (x.clamp(0.0, 1.0) * 65535.0).round() as u32),
        "pack2x16float" => pack(&args[0], 16, |x| f32_to_f16(x) as u32),
        "pack4xI8" | "pack4xU8" => pack_ints(&args[0], |v| Ok(v.as_u32()? & 0xff)),
        "pack4xI8Clamp" => pack_ints(&args[0], |v| Ok(v.as_i32()?.clamp(-128, 127) as u8 as u32)),
        "pack4xU8Clamp" => pack_ints(&args[0], |v| Ok(v.as_u32()?.min(255))),
        "unpack4x8snorm" => unpack(&args[0], 8, |b| Value::F32((b as u8 as i8 as f32 / 127.0).max(-1.0))),
        "unpack4x8unorm" => unpack(&args[0], 8, |b| Value::F32(b as f32 / 255.0)),
        "unpack4xI8" => unpack(&args[0], 8, |b| Value::I32(b as u8 as i8 as i32)),
        "unpack4xU8" => unpack(&args[0], 8, Value::U32),
        "unpack2x16snorm" => unpack(&args[0], 16, |b| Value::F32((b as u16 as i16 as f32 / 32767.0).max(-1.0))),
        "unpack2x16unorm" => unpack(&args[0], 16, |b| Value::F32(b as f32 / 65535.0)),
        "unpack2x16float" => unpack(&args[0], 16, |b| Value::F32(f16_to_f32(b as u16))),
        "dot4U8Packed" => {
            let (a, b) = (args[0].as_u32()?, args[1].as_u32()?);
            Ok(Value::U32((0..4).map(|i| ((a >> (8 * i)) & 0xff) * ((b >> (8 * i)) & 0xff)).sum()))
        }
        "dot4I8Packed" => {
            let (a, b) = (args[0].as_u32()?, args[1].as_u32()?);
            let byte = |x: u32, i: u32| (x >> (8 * i)) as u8 as i8 as i32;
            Ok(Value::I32((0..4).map(|i| byte(a, i) * byte(b, i)).sum()))
        }

        "textureDimensions" => texture_dimensions(exec, &args[0]),
        "textureNumLayers" => texture(exec, &args[0]).map(|t| Value::U32(t.size[2].max(1))),
        "textureNumLevels" | "textureNumSamples" => Ok(Value::U32(1)),
        "textureLoad" => {
            let coords = texture_coords(exec, &args[0], &args[1..])?;
            texture(exec, &args[0])?.load(&coords)
        }
        "textureStore" => {
            let (value, coord_args) = args[1..].split_last().ok_or_else(|| ExecError::other("missing texel"))?;
            let coords = texture_coords(exec, &args[0], coord_args)?;
            let Value::Texture(id) = args[0] else {
                bail_mismatch!("textureStore expects a texture, found {}", args[0].type_name());
            };
            exec.memory_mut().texture_mut(id)?.store(&coords, value)?;
            Ok(Value::Void)
        }
        "textureSample"
        | "textureSampleBias"
        | "textureSampleCompare"
        | "textureSampleCompareLevel"
        | "textureSampleGrad"
        | "textureSampleLevel"
        | "textureSampleBaseClampToEdge"
        | "textureGather"
        | "textureGatherCompare" => Err(ExecError::Unsupported {
            name: name.to_string(),
            line: 0,
        }),

        "storageBarrier" | "textureBarrier" | "workgroupBarrier" => Ok(Value::Void),

        "subgroupElect" => Ok(Value::Bool(true)),
        "subgroupExclusiveAdd" => args[0].map(|v| Ok(Value::zero(v.scalar_kind().unwrap_or(ScalarKind::F32)))),
        "subgroupExclusiveMul" => args[0].map(|v| Value::I32(1).convert(v.scalar_kind().unwrap_or(ScalarKind::F32))),
        "subgroupBallot" => Ok(Value::Vector(vec![
            Value::U32(args[0].as_bool()? as u32),
            Value::U32(0),
            Value::U32(0),
            Value::U32(0),
        ])),
        "subgroupAdd" | "subgroupInclusiveAdd" | "subgroupMul" | "subgroupInclusiveMul" | "subgroupMin"
        | "subgroupMax" | "subgroupAnd" | "subgroupOr" | "subgroupXor" | "subgroupAll" | "subgroupAny"
        | "subgroupBroadcastFirst" | "subgroupBroadcast" | "subgroupShuffle" | "subgroupShuffleDown"
        | "subgroupShuffleUp" | "subgroupShuffleXor" | "quadBroadcast" | "quadSwapX" | "quadSwapY"
        | "quadSwapDiagonal" => Ok(args[0].clone()),

        _ => Err(ExecError::UnknownFunction {
            name: name.to_string(),
            line: 0,
        }),
    }
}

fn float1(v: &Value, f: impl Fn(f32) -> f32) -> ExecResult<Value> {
    v.map(|c| Ok(Value::F32(f(c.as_f32()?))))
}

fn float2(a: &Value, b: &Value, f: impl Fn(f32, f32) -> f32) -> ExecResult<Value> {
    zip2(a, b, |x, y| Ok(Value::F32(f(x.as_f32()?, y.as_f32()?))))
}

/// Bit functions operate on the 32-bit pattern and keep the argument kind.
fn int1(v: &Value, f: impl Fn(u32) -> u32) -> ExecResult<Value> {
    v.map(|c| match c {
        Value::I32(x) => Ok(Value::I32(f(*x as u32) as i32)),
        Value::U32(x) => Ok(Value::U32(f(*x))),
        other => bail_mismatch!("expected an integer, found {}", other.type_name()),
    })
}

/// Componentwise over two arguments, broadcasting a scalar against a vector.
fn zip2(a: &Value, b: &Value, f: impl Fn(&Value, &Value) -> ExecResult<Value>) -> ExecResult<Value> {
    match (a, b) {
        (Value::Vector(x), Value::Vector(y)) => {
            if x.len() != y.len() {
                return Err(ExecError::VectorLength {
                    left: x.len(),
                    right: y.len(),
                    line: 0,
                });
            }
            Ok(Value::Vector(x.iter().zip(y).map(|(p, q)| f(p, q)).collect::<ExecResult<_>>()?))
        }
        (Value::Vector(x), s) => Ok(Value::Vector(x.iter().map(|p| f(p, s)).collect::<ExecResult<_>>()?)),
        (s, Value::Vector(y)) => Ok(Value::Vector(y.iter().map(|q| f(s, q)).collect::<ExecResult<_>>()?)),
        _ => f(a, b),
    }
}

fn zip3(a: &Value, b: &Value, c: &Value, f: impl Fn(&Value, &Value, &Value) -> ExecResult<Value>) -> ExecResult<Value> {
    let len = [a, b, c].iter().filter_map(|v| v.vector_len()).max();
    let Some(len) = len else {
        return f(a, b, c);
    };
    let component = |v: &Value, i: usize| -> ExecResult<Value> {
        match v {
            Value::Vector(items) => items.get(i).cloned().ok_or(ExecError::VectorLength {
                left: len,
                right: items.len(),
                line: 0,
            }),
            scalar => Ok(scalar.clone()),
        }
    };
    let items = (0..len)
        .map(|i| f(&component(a, i)?, &component(b, i)?, &component(c, i)?))
        .collect::<ExecResult<_>>()?;
    Ok(Value::Vector(items))
}

fn min_max(a: &Value, b: &Value, max: bool) -> ExecResult<Value> {
    let pick_a = match (a, b) {
        (Value::F32(_), _) | (_, Value::F32(_)) => {
            let (x, y) = (a.as_f32()?, b.as_f32()?);
            if x.is_nan() || y.is_nan() {
                return Ok(Value::F32(if max { x.max(y) } else { x.min(y) }));
            }
            if max {
                x >= y
            } else {
                x <= y
            }
        }
        _ => {
            let (x, y) = (a.as_i64()?, b.as_i64()?);
            if max {
                x >= y
            } else {
                x <= y
            }
        }
    };
    let (chosen, like) = if pick_a { (a, b) } else { (b, a) };
    // Keep the typed operand's kind when one side is an abstract literal.
    match (chosen, like) {
        (Value::I32(_), Value::U32(_)) | (Value::I32(_) | Value::U32(_), Value::F32(_)) => {
            chosen.convert(like.scalar_kind().unwrap_or(ScalarKind::F32))
        }
        _ => Ok(chosen.clone()),
    }
}

fn select(f: &Value, t: &Value, cond: &Value) -> ExecResult<Value> {
    match cond {
        Value::Vector(conds) => {
            let (fs, ts) = (f.components(), t.components());
            if fs.len() != conds.len() || ts.len() != conds.len() {
                return Err(ExecError::VectorLength {
                    left: conds.len(),
                    right: fs.len(),
                    line: 0,
                });
            }
            let items = conds
                .iter()
                .zip(fs.into_iter().zip(ts))
                .map(|(c, (f, t))| Ok(if c.as_bool()? { t } else { f }))
                .collect::<ExecResult<_>>()?;
            Ok(Value::Vector(items))
        }
        c => Ok(if c.as_bool()? { t.clone() } else { f.clone() }),
    }
}

fn frexp(v: &Value) -> ExecResult<Value> {
    let split = |x: f32| -> (f32, i32) {
        if x == 0.0 || !x.is_finite() {
            return (x, 0);
        }
        let exp = x.abs().log2().floor() as i32 + 1;
        let mut fract = x / 2f32.powi(exp);
        let mut exp = exp;
        // Correct for rounding in log2 near powers of two.
        if fract.abs() >= 1.0 {
            fract /= 2.0;
            exp += 1;
        } else if fract.abs() < 0.5 {
            fract *= 2.0;
            exp -= 1;
        }
        (fract, exp)
    };
    let fract = float1(v, |x| split(x).0)?;
    let exp = v.map(|c| Ok(Value::I32(split(c.as_f32()?).1)))?;
    Ok(Value::Struct {
        name: format!("__frexp_result_{}", result_suffix(v)),
        fields: vec![("fract".to_string(), fract), ("exp".to_string(), exp)],
    })
}

fn modf(v: &Value) -> ExecResult<Value> {
    Ok(Value::Struct {
        name: format!("__modf_result_{}", result_suffix(v)),
        fields: vec![
            ("fract".to_string(), float1(v, f32::fract)?),
            ("whole".to_string(), float1(v, f32::trunc)?),
        ],
    })
}

fn result_suffix(v: &Value) -> String {
    match v.vector_len() {
        Some(n) => format!("vec{}_f32", n),
        None => "f32".to_string(),
    }
}

fn first_leading_bit(v: &Value) -> ExecResult<Value> {
    Ok(match v {
        Value::U32(x) => Value::U32(if *x == 0 { u32::MAX } else { 31 - x.leading_zeros() }),
        Value::I32(x) => {
            // Position of the highest bit that differs from the sign bit.
            let bits = if *x < 0 { !*x as u32 } else { *x as u32 };
            Value::I32(if bits == 0 { -1 } else { 31 - bits.leading_zeros() as i32 })
        }
        other => bail_mismatch!("expected an integer, found {}", other.type_name()),
    })
}

fn bit_mask(count: u32) -> u32 {
    if count >= 32 {
        u32::MAX
    } else {
        (1u32 << count) - 1
    }
}

fn extract_bits(v: &Value, offset: u32, count: u32) -> ExecResult<Value> {
    let offset = offset.min(32);
    let count = count.min(32 - offset);
    Ok(match v {
        Value::U32(x) => Value::U32(x.checked_shr(offset).unwrap_or(0) & bit_mask(count)),
        Value::I32(x) => {
            if count == 0 {
                return Ok(Value::I32(0));
            }
            let field = (*x as u32).checked_shr(offset).unwrap_or(0) & bit_mask(count);
            let shift = 32 - count;
            Value::I32(((field << shift) as i32) >> shift)
        }
        other => bail_mismatch!("expected an integer, found {}", other.type_name()),
    })
}

fn insert_bits(e: &Value, new: &Value, offset: u32, count: u32) -> ExecResult<Value> {
    let offset = offset.min(32);
    let count = count.min(32 - offset);
    let mask = bit_mask(count).checked_shl(offset).unwrap_or(0);
    let bits = (e.as_u32()? & !mask) | (new.as_u32()?.checked_shl(offset).unwrap_or(0) & mask);
    Ok(match e {
        Value::I32(_) => Value::I32(bits as i32),
        _ => Value::U32(bits),
    })
}

fn dot(a: &Value, b: &Value) -> ExecResult<Value> {
    let product = ops::binary(BinaryOp::Multiply, a, b)?;
    let mut parts = product.components().into_iter();
    let first = parts.next().ok_or_else(|| ExecError::mismatch("dot of empty vectors"))?;
    parts.try_fold(first, |acc, x| ops::binary(BinaryOp::Add, &acc, &x))
}

fn length(v: &Value) -> ExecResult<f32> {
    let sum: f32 = v
        .components()
        .iter()
        .map(|c| c.as_f32().map(|x| x * x))
        .sum::<ExecResult<f32>>()?;
    Ok(sum.sqrt())
}

fn cross(a: &Value, b: &Value) -> ExecResult<Value> {
    let (a, b) = (floats(a)?, floats(b)?);
    let ([ax, ay, az], [bx, by, bz]) = (&a[..], &b[..]) else {
        bail_mismatch!("cross expects two 3-component vectors");
    };
    Ok(Value::Vector(vec![
        Value::F32(ay * bz - az * by),
        Value::F32(az * bx - ax * bz),
        Value::F32(ax * by - ay * bx),
    ]))
}

fn refract(e1: &Value, e2: &Value, eta: f32) -> ExecResult<Value> {
    let d = dot(e2, e1)?.as_f32()?;
    let k = 1.0 - eta * eta * (1.0 - d * d);
    if k < 0.0 {
        return float1(e1, |_| 0.0);
    }
    let a = ops::binary(BinaryOp::Multiply, e1, &Value::F32(eta))?;
    let b = ops::binary(BinaryOp::Multiply, e2, &Value::F32(eta * d + k.sqrt()))?;
    ops::binary(BinaryOp::Subtract, &a, &b)
}

fn floats(v: &Value) -> ExecResult<Vec<f32>> {
    v.components().iter().map(Value::as_f32).collect()
}

fn transpose(m: &Value) -> ExecResult<Value> {
    let Value::Matrix(cols) = m else {
        bail_mismatch!("transpose expects a matrix, found {}", m.type_name());
    };
    let rows = cols.first().map_or(0, Vec::len);
    Ok(Value::Matrix(
        (0..rows).map(|r| cols.iter().map(|c| c[r]).collect()).collect(),
    ))
}

fn determinant(m: &Value) -> ExecResult<Value> {
    let Value::Matrix(cols) = m else {
        bail_mismatch!("determinant expects a matrix, found {}", m.type_name());
    };
    if cols.iter().any(|c| c.len() != cols.len()) {
        bail_mismatch!("determinant expects a square matrix");
    }
    Ok(Value::F32(det(cols)))
}

fn det(cols: &[Vec<f32>]) -> f32 {
    match cols.len() {
        0 => 1.0,
        1 => cols[0][0],
        2 => cols[0][0] * cols[1][1] - cols[1][0] * cols[0][1],
        n => (0..n)
            .map(|c| {
                let minor: Vec<Vec<f32>> = cols
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != c)
                    .map(|(_, col)| col[1..].to_vec())
                    .collect();
                let sign = if c % 2 == 0 { 1.0 } else { -1.0 };
                sign * cols[c][0] * det(&minor)
            })
            .sum(),
    }
}

fn pack(v: &Value, bits: u32, f: impl Fn(f32) -> u32) -> ExecResult<Value> {
    let mask = bit_mask(bits);
    let packed = floats(v)?
        .into_iter()
        .enumerate()
        .fold(0u32, |acc, (i, x)| acc | ((f(x) & mask) << (bits * i as u32)));
    Ok(Value::U32(packed))
}

fn pack_ints(v: &Value, f: impl Fn(&Value) -> ExecResult<u32>) -> ExecResult<Value> {
    let mut packed = 0u32;
    for (i, c) in v.components().iter().enumerate() {
        packed |= (f(c)? & 0xff) << (8 * i as u32);
    }
    Ok(Value::U32(packed))
}

fn unpack(v: &Value, bits: u32, f: impl Fn(u32) -> Value) -> ExecResult<Value> {
    let x = v.as_u32()?;
    let count = 32 / bits;
    Ok(Value::Vector(
        (0..count).map(|i| f((x >> (bits * i)) & bit_mask(bits))).collect(),
    ))
}

fn pointer(v: &Value, name: &str) -> ExecResult<Place> {
    match v {
        Value::Pointer(place) => Ok(place.clone()),
        other => bail_mismatch!("{} expects a pointer, found {}", name, other.type_name()),
    }
}

fn texture<'a>(exec: &'a Executor, v: &Value) -> ExecResult<&'a crate::exec::texture::TextureData> {
    match v {
        Value::Texture(id) => exec.memory().texture(*id),
        other => bail_mismatch!("expected a texture, found {}", other.type_name()),
    }
}

fn texture_dimensions(exec: &Executor, v: &Value) -> ExecResult<Value> {
    let t = texture(exec, v)?;
    let dims = t.dims.clamp(1, 3);
    if dims == 1 {
        return Ok(Value::U32(t.size[0]));
    }
    Ok(Value::Vector(t.size[..dims].iter().map(|s| Value::U32(*s)).collect()))
}

/// Coordinates plus array layer for arrayed textures. A trailing mip level or
/// sample index is ignored.
fn texture_coords(exec: &Executor, t: &Value, args: &[Value]) -> ExecResult<Vec<i64>> {
    let data = texture(exec, t)?;
    let first = args.first().ok_or_else(|| ExecError::other("missing texture coordinates"))?;
    let mut coords = first.components().iter().map(Value::as_i64).collect::<ExecResult<Vec<_>>>()?;
    if data.arrayed {
        let layer = args.get(1).ok_or_else(|| ExecError::other("missing array index"))?;
        coords.push(layer.as_i64()?);
    }
    Ok(coords)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fvec(values: &[f32]) -> Value {
        Value::Vector(values.iter().map(|v| Value::F32(*v)).collect())
    }

    fn run(name: &str, args: Vec<Value>) -> ExecResult<Value> {
        let program = crate::parser::parse_source("").unwrap();
        let mut exec = Executor::new(&program);
        call(&mut exec, name, args)
    }

    #[test]
    fn test_componentwise_and_broadcast() {
        assert_eq!(run("floor", vec![fvec(&[1.5, -1.5])]).unwrap(), fvec(&[1.0, -2.0]));
        assert_eq!(
            run("clamp", vec![fvec(&[-1.0, 0.5, 2.0]), Value::F32(0.0), Value::F32(1.0)]).unwrap(),
            fvec(&[0.0, 0.5, 1.0])
        );
        assert_eq!(
            run("mix", vec![fvec(&[0.0, 10.0]), fvec(&[10.0, 20.0]), Value::F32(0.5)]).unwrap(),
            fvec(&[5.0, 15.0])
        );
        assert_eq!(run("max", vec![Value::U32(3), Value::I32(5)]).unwrap(), Value::U32(5));
        assert_eq!(run("abs", vec![Value::I32(-4)]).unwrap(), Value::I32(4));
    }

    #[test]
    fn test_geometry() {
        assert_eq!(run("dot", vec![fvec(&[1.0, 2.0, 3.0]), fvec(&[4.0, 5.0, 6.0])]).unwrap(), Value::F32(32.0));
        assert_eq!(
            run("cross", vec![fvec(&[1.0, 0.0, 0.0]), fvec(&[0.0, 1.0, 0.0])]).unwrap(),
            fvec(&[0.0, 0.0, 1.0])
        );
        assert_eq!(run("length", vec![fvec(&[3.0, 4.0])]).unwrap(), Value::F32(5.0));
        assert_eq!(run("normalize", vec![fvec(&[0.0, 2.0])]).unwrap(), fvec(&[0.0, 1.0]));
        assert_eq!(
            run("reflect", vec![fvec(&[1.0, -1.0]), fvec(&[0.0, 1.0])]).unwrap(),
            fvec(&[1.0, 1.0])
        );
    }

    #[test]
    fn test_matrices() {
        let m = Value::Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(run("determinant", vec![m.clone()]).unwrap(), Value::F32(-2.0));
        assert_eq!(
            run("transpose", vec![m]).unwrap(),
            Value::Matrix(vec![vec![1.0, 3.0], vec![2.0, 4.0]])
        );
        let m3 = Value::Matrix(vec![vec![2.0, 0.0, 0.0], vec![0.0, 3.0, 0.0], vec![0.0, 0.0, 4.0]]);
        assert_eq!(run("determinant", vec![m3]).unwrap(), Value::F32(24.0));
    }

    #[test]
    fn test_bits() {
        assert_eq!(run("countOneBits", vec![Value::U32(0b1011)]).unwrap(), Value::U32(3));
        assert_eq!(run("firstLeadingBit", vec![Value::U32(0x10)]).unwrap(), Value::U32(4));
        assert_eq!(run("firstLeadingBit", vec![Value::I32(-1)]).unwrap(), Value::I32(-1));
        assert_eq!(run("firstTrailingBit", vec![Value::U32(0)]).unwrap(), Value::U32(u32::MAX));
        assert_eq!(
            run("extractBits", vec![Value::I32(0b1110_0000), Value::U32(5), Value::U32(3)]).unwrap(),
            Value::I32(-1)
        );
        assert_eq!(
            run("insertBits", vec![Value::U32(0), Value::U32(0b11), Value::U32(4), Value::U32(2)]).unwrap(),
            Value::U32(0b11_0000)
        );
    }

    #[test]
    fn test_pack_round_trip() {
        let packed = run("pack4x8unorm", vec![fvec(&[0.0, 1.0, 0.0, 1.0])]).unwrap();
        assert_eq!(packed, Value::U32(0xff00_ff00));
        assert_eq!(run("unpack4x8unorm", vec![packed]).unwrap(), fvec(&[0.0, 1.0, 0.0, 1.0]));
        let half = run("pack2x16float", vec![fvec(&[1.0, -2.0])]).unwrap();
        assert_eq!(half, Value::U32(0xc000_3c00));
    }

    #[test]
    fn test_frexp_and_modf() {
        let Value::Struct { fields, .. } = run("frexp", vec![Value::F32(8.0)]).unwrap() else {
            panic!("frexp returns a struct");
        };
        assert_eq!(fields[0].1, Value::F32(0.5));
        assert_eq!(fields[1].1, Value::I32(4));
        let Value::Struct { fields, .. } = run("modf", vec![Value::F32(-2.5)]).unwrap() else {
            panic!("modf returns a struct");
        };
        assert_eq!(fields[0].1, Value::F32(-0.5));
        assert_eq!(fields[1].1, Value::F32(-2.0));
    }

    #[test]
    fn test_arity_and_stubs() {
        assert!(matches!(run("sin", vec![]), Err(ExecError::Arity { .. })));
        assert!(matches!(
            run("textureSample", vec![Value::Void, Value::Sampler, Value::F32(0.0)]),
            Err(ExecError::Unsupported { .. })
        ));
        assert_eq!(run("subgroupAdd", vec![Value::I32(7)]).unwrap(), Value::I32(7));
        assert_eq!(run("workgroupBarrier", vec![]).unwrap(), Value::Void);
    }
}
