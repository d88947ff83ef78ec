// Loading configuration and script files from disk

use std::fs::write;
use std::time::Duration;

use ferrous_lua::config::VMConfig;
use ferrous_lua::lua::{LuaError, LuaVM, RuntimeErrorKind, Value};
use tempfile::{tempdir, NamedTempFile};

#[test]
fn test_vm_from_config_file() {
    let conf = NamedTempFile::new().unwrap();
    write(
        conf.path(),
        "chunk-name jobs\ncall-depth-limit 10\ntimeout-ms 50\n",
    )
    .unwrap();

    let config = VMConfig::from_file(conf.path()).unwrap();
    assert_eq!(config.limits.timeout, Some(Duration::from_millis(50)));

    let vm = LuaVM::with_config(config).unwrap();
    let err = vm.eval("local function f() return f() + 1 end return f()").unwrap_err();
    assert_eq!(err.to_string(), "jobs:1: stack overflow");

    let err = vm.eval("while true do end").unwrap_err();
    assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::Timeout));
    assert_eq!(err.to_string(), "jobs:1: execution timed out");
}

#[test]
fn test_vm_without_stdlib() {
    let conf = NamedTempFile::new().unwrap();
    write(conf.path(), "stdlib no\n").unwrap();
    let vm = LuaVM::with_config(VMConfig::from_file(conf.path()).unwrap()).unwrap();
    assert!(vm.get_global("print").is_nil());
    assert_eq!(vm.eval("return 40 + 2").unwrap().first(), Value::from(42));
}

#[test]
fn test_load_file_uses_path_as_chunk_name() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("script.lua");
    write(&path, "local n = ...\nreturn n .. '!', missing.field").unwrap();

    let chunk = LuaVM::load_file(&path).unwrap();
    assert_eq!(chunk.name(), path.display().to_string());

    let vm = LuaVM::new().unwrap();
    let err = vm.execute_with_args(&chunk, Value::from("hi").into()).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("{}:2: attempt to index global 'missing' (a nil value)", path.display())
    );
}

#[test]
fn test_load_file_reports_missing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.lua");
    match LuaVM::load_file(&path) {
        Err(LuaError::Io { path: reported, .. }) => assert_eq!(reported, path.display().to_string()),
        other => panic!("expected io error, got {:?}", other.map(|_| ())),
    }
}
