use super::*;
use crate::error::ShaderError;
use crate::lexer::tokenize;

fn parse_ok(source: &str) -> Program {
    parse_source(source).unwrap_or_else(|e| panic!("parse failed: {}", e))
}

fn parse_expr(source: &str) -> Expression {
    Parser::new(tokenize(source).unwrap()).parse_standalone_expression().unwrap()
}

fn first_function(program: &Program) -> &Function {
    program.functions().next().expect("no function parsed")
}

fn global_var<'a>(program: &'a Program, name: &str) -> &'a VarDecl {
    program
        .declarations
        .iter()
        .find_map(|d| match d {
            Declaration::Var(v) if v.name == name => Some(v),
            _ => None,
        })
        .expect("global not found")
}

#[test]
fn test_parse_compute_shader() {
    let program = parse_ok(
        r#"
        struct Particle {
            pos: vec4<f32>,
            @align(16) vel: vec3f,
        };

        @group(0) @binding(1) var<storage, read_write> particles: array<Particle>;

        @compute @workgroup_size(64, 1, 1)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            let i = id.x;
            particles[i].pos += vec4<f32>(particles[i].vel, 0.0);
        }
        "#,
    );

    let s = program.structs().next().unwrap();
    assert_eq!(s.name, "Particle");
    assert_eq!(s.members.len(), 2);
    assert_eq!(s.start_line, 2);
    assert_eq!(s.end_line, 5);
    assert_eq!(s.members[1].attributes[0].name, "align");
    assert_eq!(s.members[1].ty.to_string(), "vec3<f32>");

    let var = global_var(&program, "particles");
    assert_eq!(var.storage.as_deref(), Some("storage"));
    assert_eq!(var.access.as_deref(), Some("read_write"));
    assert_eq!(find_attribute(&var.attributes, "binding").unwrap().first_arg_text().as_deref(), Some("1"));

    let main = first_function(&program);
    assert_eq!(main.name, "main");
    assert_eq!(main.attribute("workgroup_size").unwrap().args.len(), 3);
    assert_eq!(main.args[0].attributes[0].first_arg_text().as_deref(), Some("global_invocation_id"));
    assert_eq!(main.body.len(), 2);
    assert!(matches!(
        main.body[1].kind,
        StmtKind::Assign {
            op: AssignOp::Add,
            target: Some(_),
            ..
        }
    ));
}

#[test]
fn test_precedence() {
    let expr = parse_expr("1 + 2 * 3");
    let ExprKind::Binary(BinaryOp::Add, _, rhs) = expr.kind else {
        panic!("expected addition at the root");
    };
    assert!(matches!(rhs.kind, ExprKind::Binary(BinaryOp::Multiply, _, _)));

    let expr = parse_expr("a || b && c");
    assert!(matches!(expr.kind, ExprKind::Binary(BinaryOp::LogicalOr, _, _)));

    let expr = parse_expr("a & b == c");
    assert!(matches!(expr.kind, ExprKind::Binary(BinaryOp::BitAnd, _, _)));
}

#[test]
fn test_shift_and_nested_templates() {
    let expr = parse_expr("x >> 2u");
    assert!(matches!(expr.kind, ExprKind::Binary(BinaryOp::ShiftRight, _, _)));

    let program = parse_ok("var<private> v: array<vec4<f32>>;");
    let ty = global_var(&program, "v").ty.as_ref().unwrap();
    assert_eq!(ty.to_string(), "array<vec4<f32>>");
}

#[test]
fn test_constructors_and_calls() {
    let expr = parse_expr("vec3<f32>(1.0, 2.0, 3.0)");
    let ExprKind::Construct { ty, args } = &expr.kind else {
        panic!("expected constructor");
    };
    assert_eq!(ty.name(), "vec3");
    assert_eq!(ty.format().unwrap().name(), "f32");
    assert_eq!(args.len(), 3);

    let expr = parse_expr("vec2i(1, 2)");
    let ExprKind::Construct { ty, .. } = &expr.kind else {
        panic!("expected constructor");
    };
    assert_eq!(ty.to_string(), "vec2<i32>");

    let expr = parse_expr("max(a, b)");
    assert!(matches!(&expr.kind, ExprKind::Call { name, args } if name == "max" && args.len() == 2));

    let expr = parse_expr("bitcast<u32>(1.0)");
    assert!(matches!(expr.kind, ExprKind::Bitcast { .. }));
}

#[test]
fn test_struct_constructor_after_declaration() {
    let program = parse_ok(
        "struct S { a: f32 }
         fn f() -> S { return S(1.0); }",
    );
    let f = first_function(&program);
    let StmtKind::Return(Some(value)) = &f.body[0].kind else {
        panic!("expected return");
    };
    assert!(matches!(&value.kind, ExprKind::Construct { ty, .. } if ty.name() == "S"));
}

#[test]
fn test_literals() {
    let lit = |src: &str| match parse_expr(src).kind {
        ExprKind::Literal(lit) => lit,
        other => panic!("expected literal, got {:?}", other),
    };

    assert_eq!(lit("42u"), Literal::Int { value: 42, suffix: Some('u') });
    assert_eq!(lit("0xFFi"), Literal::Int { value: 255, suffix: Some('i') });
    assert_eq!(
        lit("-2147483648i"),
        Literal::Int {
            value: -2147483648,
            suffix: Some('i')
        }
    );
    assert_eq!(lit("1.5f"), Literal::Float { value: 1.5, suffix: Some('f') });
    assert_eq!(lit(".25"), Literal::Float { value: 0.25, suffix: None });
    assert_eq!(lit("0x1p4"), Literal::Float { value: 16.0, suffix: None });
    assert_eq!(lit("0x.8"), Literal::Float { value: 0.5, suffix: None });
    assert_eq!(lit("true"), Literal::Bool(true));
}

#[test]
fn test_array_count_folded_from_earlier_constant() {
    let program = parse_ok(
        "const N = 4u;
         var<workgroup> tile: array<f32, N * 2u>;",
    );
    let ty = global_var(&program, "tile").ty.as_ref().unwrap();
    assert!(matches!(ty.kind, TypeKind::Array { count: Some(8), .. }));
}

#[test]
fn test_array_count_deferred_until_constant_declared() {
    let mut parser = Parser::new(
        tokenize(
            "var<workgroup> tile: array<f32, N>;
             const N = 16;",
        )
        .unwrap(),
    );
    let program = parser.parse().unwrap();
    assert_eq!(parser.context().deferred_count(), 1);
    let ty = global_var(&program, "tile").ty.as_ref().unwrap();
    assert!(matches!(ty.kind, TypeKind::Array { count: Some(16), .. }));
}

#[test]
fn test_function_constants_stay_inside_the_function() {
    let program = parse_ok(
        "const N = 2;
         fn main() {
             const N = 8;
             const M = 3;
             var local: array<f32, N>;
         }
         var<private> a: array<f32, N>;
         var<private> b: array<f32, M>;",
    );
    let ty = global_var(&program, "a").ty.as_ref().unwrap();
    assert!(matches!(ty.kind, TypeKind::Array { count: Some(2), .. }));
    let ty = global_var(&program, "b").ty.as_ref().unwrap();
    assert!(matches!(ty.kind, TypeKind::Array { count: None, .. }));

    let StmtKind::Var(local) = &program.function("main").unwrap().body[2].kind else {
        panic!("expected var");
    };
    let ty = local.ty.as_ref().unwrap();
    assert!(matches!(ty.kind, TypeKind::Array { count: Some(8), .. }));
}

#[test]
fn test_unresolvable_array_count_stays_unknown() {
    let program = parse_ok("var<private> a: array<f32, MISSING>;");
    let ty = global_var(&program, "a").ty.as_ref().unwrap();
    let TypeKind::Array { count, count_expr, .. } = &ty.kind else {
        panic!("expected array");
    };
    assert_eq!(*count, None);
    assert!(count_expr.is_some());
}

#[test]
fn test_control_flow_statements() {
    let program = parse_ok(
        r#"
        fn f(n: i32) -> i32 {
            var total = 0;
            for (var i = 0; i < n; i++) {
                if i == 2 { continue; } else if i > 5 { break; } else { total += i; }
            }
            loop {
                total -= 1;
                continuing {
                    break if total < 0;
                }
            }
            while total < 10 { total++; }
            switch total {
                case 1, 2: { total = 3; }
                case default, 4 { }
            }
            total ^= 3;
            _ = total;
            return total;
        }
        "#,
    );

    let body = &first_function(&program).body;
    assert!(matches!(&body[1].kind, StmtKind::For { init: Some(_), condition: Some(_), increment: Some(_), .. }));
    let StmtKind::Loop { continuing: Some(continuing), .. } = &body[2].kind else {
        panic!("expected loop with continuing");
    };
    assert!(matches!(continuing[0].kind, StmtKind::BreakIf(_)));
    assert!(matches!(body[3].kind, StmtKind::While { .. }));
    let StmtKind::Switch { cases, .. } = &body[4].kind else {
        panic!("expected switch");
    };
    assert_eq!(cases[0].selectors.len(), 2);
    assert!(cases[1].is_default);
    assert!(matches!(body[5].kind, StmtKind::Assign { op: AssignOp::Xor, .. }));
    assert!(matches!(body[6].kind, StmtKind::Assign { target: None, .. }));
    assert!(matches!(body[7].kind, StmtKind::Return(Some(_))));
}

#[test]
fn test_pointers_and_textures() {
    let program = parse_ok(
        "@group(0) @binding(0) var out_tex: texture_storage_2d<rgba8unorm, write>;
         fn bump(p: ptr<function, i32>) { *p = *p + 1; }",
    );
    let ty = global_var(&program, "out_tex").ty.as_ref().unwrap();
    assert_eq!(ty.to_string(), "texture_storage_2d<rgba8unorm, write>");

    let bump = first_function(&program);
    assert_eq!(bump.args[0].ty.to_string(), "ptr<function, i32>");
    let StmtKind::Assign { target: Some(target), .. } = &bump.body[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(target.kind, ExprKind::Unary(UnaryOp::Deref, _)));
}

#[test]
fn test_directives_overrides_and_aliases() {
    let program = parse_ok(
        "enable f16;
         diagnostic(off, derivative_uniformity);
         alias Vec = vec3<f32>;
         @id(7) override scale: f32 = 2.0;
         const_assert 1 < 2;",
    );
    assert!(matches!(&program.declarations[0], Declaration::Enable(names) if names == &["f16"]));
    assert!(matches!(&program.declarations[1], Declaration::Diagnostic { severity, .. } if severity == "off"));
    assert_eq!(program.aliases().next().unwrap().ty.to_string(), "vec3<f32>");
    assert!(matches!(&program.declarations[3], Declaration::Override(v) if v.name == "scale"));
    assert!(matches!(program.declarations[4], Declaration::ConstAssert(_)));
}

#[test]
fn test_missing_semicolon_reports_line() {
    let err = parse_source("fn f() {\n  let x = 1\n}").unwrap_err();
    match err {
        ShaderError::Parse { line, lexeme, .. } => {
            assert_eq!(line, 3);
            assert_eq!(lexeme, "}");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_unexpected_global_token() {
    let err = parse_source("return 1;").unwrap_err();
    assert!(matches!(err, ShaderError::Parse { line: 1, .. }));
}
