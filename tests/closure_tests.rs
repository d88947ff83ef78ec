// Upvalue capture and closure lifetime

use ferrous_lua::lua::{LuaVM, Value};

fn eval(source: &str) -> Vec<Value> {
    let vm = LuaVM::new().unwrap();
    match vm.eval(source) {
        Ok(values) => values.into_vec(),
        Err(e) => panic!("script failed: {}\n{}", e, source),
    }
}

#[test]
fn test_counter_keeps_private_state() {
    let values = eval(
        "local function counter()
           local n = 0
           return function() n = n + 1 return n end
         end
         local a, b = counter(), counter()
         a() a()
         return a(), b()",
    );
    assert_eq!(values, vec![Value::from(3), Value::from(1)]);
}

#[test]
fn test_closures_share_one_cell() {
    let values = eval(
        "local function pair()
           local v = 0
           local function get() return v end
           local function set(x) v = x end
           return get, set
         end
         local get, set = pair()
         set(42)
         return get()",
    );
    assert_eq!(values, vec![Value::from(42)]);
}

#[test]
fn test_mutation_after_capture_is_visible() {
    let values = eval(
        "local x = 1
         local function read() return x end
         x = 2
         local before = read()
         x = x + 1
         return before, read()",
    );
    assert_eq!(values, vec![Value::from(2), Value::from(3)]);
}

#[test]
fn test_numeric_for_binds_fresh_variable_per_iteration() {
    let values = eval(
        "local fns = {}
         for i = 1, 3 do fns[i] = function() return i end end
         return fns[1](), fns[2](), fns[3]()",
    );
    assert_eq!(values, vec![Value::from(1), Value::from(2), Value::from(3)]);
}

#[test]
fn test_generic_for_binds_fresh_variables() {
    let values = eval(
        "local fns = {}
         for k, v in ipairs({'a', 'b'}) do fns[k] = function() return k .. v end end
         return fns[1](), fns[2]()",
    );
    assert_eq!(values, vec![Value::from("1a"), Value::from("2b")]);
}

#[test]
fn test_block_local_captured_in_while_loop() {
    let values = eval(
        "local fns, i = {}, 0
         while i < 3 do
           i = i + 1
           local j = i * 10
           fns[i] = function() return j end
         end
         return fns[1](), fns[3]()",
    );
    assert_eq!(values, vec![Value::from(10), Value::from(30)]);
}

#[test]
fn test_nested_upvalue_chain() {
    let values = eval(
        "local function outer()
           local depth = 'outer'
           return function()
             return function()
               depth = depth .. '+'
               return depth
             end
           end
         end
         local inner = outer()()
         inner()
         return inner()",
    );
    assert_eq!(values, vec![Value::from("outer++")]);
}

#[test]
fn test_parameters_are_private_per_activation() {
    let values = eval(
        "local function make(x) return function() x = x * 2 return x end end
         local a, b = make(1), make(5)
         a() a()
         return a(), b()",
    );
    assert_eq!(values, vec![Value::from(8), Value::from(10)]);
}

#[test]
fn test_recursive_local_function_sees_itself() {
    let values = eval(
        "local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end
         local g = fact
         fact = nil
         local ok = pcall(g, 3)
         return ok",
    );
    // `fact` is an upvalue of itself, so clearing it breaks the recursion
    assert_eq!(values, vec![Value::Boolean(false)]);
}

#[test]
fn test_closure_outlives_vm_call() {
    let vm = LuaVM::new().unwrap();
    vm.eval("local secret = 'kept' function reveal() return secret end")
        .unwrap();
    let reveal = vm.get_global("reveal");
    let result = vm.call(&reveal, Default::default()).unwrap();
    assert_eq!(result.first(), Value::from("kept"));
}

#[test]
fn test_closures_from_shared_chunk_are_independent_per_vm() {
    let chunk = LuaVM::compile("count = (count or 0) + 1 return count", "shared").unwrap();
    let first = LuaVM::new().unwrap();
    let second = LuaVM::new().unwrap();
    first.execute(&chunk).unwrap();
    let a = first.execute(&chunk).unwrap().first();
    let b = second.execute(&chunk).unwrap().first();
    assert_eq!((a, b), (Value::from(2), Value::from(1)));
}
