// Centralized builtin function registry
// Names, argument counts and categories for every WGSL built-in function the
// executor knows about. Reflection uses it to keep built-ins out of call
// graphs; the executor checks arity against it before evaluating a call.

use crate::error::{ExecError, ExecResult};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCategory {
    /// Componentwise numeric functions (`sin`, `clamp`, `mix`, ...).
    Numeric,
    /// Integer bit manipulation.
    Bits,
    /// Geometric vector functions (`dot`, `cross`, `reflect`, ...).
    Vector,
    Matrix,
    Logical,
    Pack,
    Array,
    Atomic,
    Texture,
    /// Derivatives evaluate to zero: there are no neighbouring fragments.
    Derivative,
    /// Barriers are no-ops: invocations run one after another.
    Sync,
    /// Subgroup and quad operations behave as a group of one invocation.
    Subgroup,
}

#[derive(Debug, Clone)]
pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub category: BuiltinCategory,
}

/// Central registry for all builtin functions
#[derive(Debug, Clone)]
pub struct BuiltinRegistry {
    builtins: HashMap<&'static str, BuiltinDescriptor>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = BuiltinRegistry {
            builtins: HashMap::new(),
        };

        registry.register_numeric_functions();
        registry.register_bit_functions();
        registry.register_vector_functions();
        registry.register_matrix_functions();
        registry.register_pack_functions();
        registry.register_atomic_functions();
        registry.register_texture_functions();
        registry.register_sync_and_subgroup_functions();

        registry
    }

    /// Check if a name is a registered builtin
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&BuiltinDescriptor> {
        self.builtins.get(name)
    }

    pub fn len(&self) -> usize {
        self.builtins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtins.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.builtins.keys().copied()
    }

    /// Verify a call's argument count.
    pub fn check_arity(&self, name: &str, found: usize) -> ExecResult<()> {
        let Some(desc) = self.get(name) else {
            return Err(ExecError::UnknownFunction {
                name: name.to_string(),
                line: 0,
            });
        };
        if found < desc.min_args || found > desc.max_args {
            return Err(ExecError::Arity {
                name: name.to_string(),
                expected: if found < desc.min_args { desc.min_args } else { desc.max_args },
                found,
                line: 0,
            });
        }
        Ok(())
    }

    fn register(&mut self, category: BuiltinCategory, min_args: usize, max_args: usize, names: &[&'static str]) {
        for &name in names {
            self.builtins.insert(
                name,
                BuiltinDescriptor {
                    name,
                    min_args,
                    max_args,
                    category,
                },
            );
        }
    }

    fn register_numeric_functions(&mut self) {
        use BuiltinCategory::Numeric;
        self.register(
            Numeric,
            1,
            1,
            &[
                "abs", "acos", "acosh", "asin", "asinh", "atan", "atanh", "ceil", "cos", "cosh", "degrees", "exp",
                "exp2", "floor", "fract", "inverseSqrt", "log", "log2", "quantizeToF16", "radians", "round",
                "saturate", "sign", "sin", "sinh", "sqrt", "tan", "tanh", "trunc", "frexp", "modf",
            ],
        );
        self.register(Numeric, 2, 2, &["atan2", "max", "min", "pow", "step", "ldexp"]);
        self.register(Numeric, 3, 3, &["clamp", "fma", "mix", "smoothstep", "select"]);
        self.register(BuiltinCategory::Logical, 1, 1, &["all", "any"]);
        self.register(
            BuiltinCategory::Derivative,
            1,
            1,
            &[
                "dpdx", "dpdxCoarse", "dpdxFine", "dpdy", "dpdyCoarse", "dpdyFine", "fwidth", "fwidthCoarse",
                "fwidthFine",
            ],
        );
    }

    fn register_bit_functions(&mut self) {
        use BuiltinCategory::Bits;
        self.register(
            Bits,
            1,
            1,
            &[
                "countLeadingZeros",
                "countOneBits",
                "countTrailingZeros",
                "firstLeadingBit",
                "firstTrailingBit",
                "reverseBits",
            ],
        );
        self.register(Bits, 3, 3, &["extractBits"]);
        self.register(Bits, 4, 4, &["insertBits"]);
    }

    fn register_vector_functions(&mut self) {
        use BuiltinCategory::Vector;
        self.register(Vector, 1, 1, &["length", "normalize"]);
        self.register(Vector, 2, 2, &["cross", "distance", "dot", "reflect"]);
        self.register(Vector, 3, 3, &["faceForward", "refract"]);
        self.register(BuiltinCategory::Array, 1, 1, &["arrayLength"]);
    }

    fn register_matrix_functions(&mut self) {
        self.register(BuiltinCategory::Matrix, 1, 1, &["determinant", "transpose"]);
    }

    fn register_pack_functions(&mut self) {
        use BuiltinCategory::Pack;
        self.register(
            Pack,
            1,
            1,
            &[
                "pack4x8snorm",
                "pack4x8unorm",
                "pack4xI8",
                "pack4xU8",
                "pack4xI8Clamp",
                "pack4xU8Clamp",
                "pack2x16snorm",
                "pack2x16unorm",
                "pack2x16float",
                "unpack4x8snorm",
                "unpack4x8unorm",
                "unpack4xI8",
                "unpack4xU8",
                "unpack2x16snorm",
                "unpack2x16unorm",
                "unpack2x16float",
            ],
        );
        self.register(Pack, 2, 2, &["dot4U8Packed", "dot4I8Packed"]);
    }

    fn register_atomic_functions(&mut self) {
        use BuiltinCategory::Atomic;
        self.register(Atomic, 1, 1, &["atomicLoad"]);
        self.register(
            Atomic,
            2,
            2,
            &[
                "atomicStore",
                "atomicAdd",
                "atomicSub",
                "atomicMax",
                "atomicMin",
                "atomicAnd",
                "atomicOr",
                "atomicXor",
                "atomicExchange",
            ],
        );
        self.register(Atomic, 3, 3, &["atomicCompareExchangeWeak"]);
    }

    fn register_texture_functions(&mut self) {
        use BuiltinCategory::Texture;
        self.register(Texture, 1, 2, &["textureDimensions"]);
        self.register(Texture, 2, 4, &["textureLoad"]);
        self.register(Texture, 3, 4, &["textureStore"]);
        self.register(Texture, 1, 1, &["textureNumLayers", "textureNumLevels", "textureNumSamples"]);
        self.register(
            Texture,
            3,
            6,
            &[
                "textureSample",
                "textureSampleBias",
                "textureSampleCompare",
                "textureSampleCompareLevel",
                "textureSampleGrad",
                "textureSampleLevel",
                "textureSampleBaseClampToEdge",
                "textureGather",
                "textureGatherCompare",
            ],
        );
    }

    fn register_sync_and_subgroup_functions(&mut self) {
        use BuiltinCategory::{Subgroup, Sync};
        self.register(Sync, 0, 0, &["storageBarrier", "textureBarrier", "workgroupBarrier"]);
        self.register(Sync, 1, 1, &["workgroupUniformLoad"]);
        self.register(Subgroup, 0, 0, &["subgroupElect"]);
        self.register(
            Subgroup,
            1,
            1,
            &[
                "subgroupAdd",
                "subgroupExclusiveAdd",
                "subgroupInclusiveAdd",
                "subgroupMul",
                "subgroupExclusiveMul",
                "subgroupInclusiveMul",
                "subgroupMin",
                "subgroupMax",
                "subgroupAnd",
                "subgroupOr",
                "subgroupXor",
                "subgroupAll",
                "subgroupAny",
                "subgroupBallot",
                "subgroupBroadcastFirst",
                "quadSwapX",
                "quadSwapY",
                "quadSwapDiagonal",
            ],
        );
        self.register(
            Subgroup,
            2,
            2,
            &[
                "subgroupBroadcast",
                "subgroupShuffle",
                "subgroupShuffleDown",
                "subgroupShuffleUp",
                "subgroupShuffleXor",
                "quadBroadcast",
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_the_library() {
        let registry = BuiltinRegistry::new();
        assert!(registry.len() >= 120);
        for name in ["sin", "dot", "transpose", "atomicAdd", "textureLoad", "pack4x8unorm", "workgroupBarrier"] {
            assert!(registry.is_builtin(name), "{} missing", name);
        }
        assert!(!registry.is_builtin("main"));
    }

    #[test]
    fn test_check_arity() {
        let registry = BuiltinRegistry::new();
        assert!(registry.check_arity("clamp", 3).is_ok());
        assert!(matches!(
            registry.check_arity("clamp", 2),
            Err(ExecError::Arity { expected: 3, found: 2, .. })
        ));
        assert!(matches!(
            registry.check_arity("nope", 0),
            Err(ExecError::UnknownFunction { .. })
        ));
    }
}
