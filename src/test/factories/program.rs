use crate::ir::{
    AccessFlags, ClassDef, FieldDef, FieldId, MemberRef, MethodBuilder, MethodDef, MethodId,
    Opcode, Program, Reg,
};

// Helper function to create a program with class `LFoo;` and its static int field `x`
pub fn static_field_program() -> (Program, FieldId) {
    let mut program = Program::new();
    program.add_class(ClassDef::new("LFoo;"));
    let field = program.add_field(FieldDef::new("LFoo;", "x", AccessFlags::STATIC));
    (program, field)
}

// Helper function to create a public static method of `LFoo;` that returns `value`
pub fn add_constant_method(program: &mut Program, name: &str, value: i64) -> MethodId {
    program.add_method_with_body(
        MethodDef::new("LFoo;", name, AccessFlags::PUBLIC | AccessFlags::STATIC),
        MethodBuilder::new(1, []).build_with(|m| {
            m.block(0, |b| {
                b.const_(Reg(0), value);
                b.ret(Reg(0));
            });
        }),
    )
}

// Helper function to create a public static method of `LFoo;` that returns the result of
// calling `callee`
pub fn add_forwarding_method(program: &mut Program, name: &str, callee: &str) -> MethodId {
    program.add_method_with_body(
        MethodDef::new("LFoo;", name, AccessFlags::PUBLIC | AccessFlags::STATIC),
        MethodBuilder::new(1, []).build_with(|m| {
            m.block(0, |b| {
                b.invoke(Opcode::InvokeStatic, MemberRef::new("LFoo;", callee), []);
                b.move_result(Reg(0));
                b.ret(Reg(0));
            });
        }),
    )
}

// Helper function to create the chain `main -> m1 -> ... -> m<depth>`, where the last
// method returns 7. Returns the ids from `main` down.
pub fn call_chain_program(depth: usize) -> (Program, Vec<MethodId>) {
    let mut program = Program::new();
    program.add_class(ClassDef::new("LFoo;"));
    let mut ids = Vec::with_capacity(depth + 1);
    for i in 0..depth {
        let name = if i == 0 { "main".to_string() } else { format!("m{i}") };
        ids.push(add_forwarding_method(
            &mut program,
            &name,
            &format!("m{}", i + 1),
        ));
    }
    ids.push(add_constant_method(&mut program, &format!("m{depth}"), 7));
    (program, ids)
}

// Helper function to create `LFoo;->main` calling `LBar;->helper`, which calls the
// private instance method `LBar;->secret` through `invoke-direct`.
// Returns `(main, helper, secret)`.
pub fn private_call_program() -> (Program, MethodId, MethodId, MethodId) {
    let mut program = Program::new();
    program.add_class(ClassDef::new("LFoo;"));
    program.add_class(ClassDef::new("LBar;"));
    let secret = program.add_method_with_body(
        MethodDef::new("LBar;", "secret", AccessFlags::PRIVATE),
        MethodBuilder::new(1, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                b.return_void();
            });
        }),
    );
    let helper = program.add_method_with_body(
        MethodDef::new("LBar;", "helper", AccessFlags::PUBLIC | AccessFlags::STATIC),
        MethodBuilder::new(1, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                b.invoke(
                    Opcode::InvokeDirect,
                    MemberRef::new("LBar;", "secret"),
                    [Reg(0)],
                );
                b.return_void();
            });
        }),
    );
    let main = program.add_method_with_body(
        MethodDef::new("LFoo;", "main", AccessFlags::PUBLIC | AccessFlags::STATIC).root(),
        MethodBuilder::new(1, [Reg(0)]).build_with(|m| {
            m.block(0, |b| {
                b.invoke(
                    Opcode::InvokeStatic,
                    MemberRef::new("LBar;", "helper"),
                    [Reg(0)],
                );
                b.return_void();
            });
        }),
    );
    (program, main, helper, secret)
}
