//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use wabt_bridge::{Allocator, BridgeConfig, LinearMemory, NativeRuntime};

/// A minimal module exporting `add`.
pub const ADD_WAT: &str = r#"
(module
    (func $add (param $a i32) (param $b i32) (result i32)
        local.get $a
        local.get $b
        i32.add
    )
    (export "add" (func $add))
)
"#;

/// A module touching most index spaces.
pub const KITCHEN_SINK_WAT: &str = r#"
(module
    (type $binop (func (param i32 i32) (result i32)))
    (import "env" "log" (func $log (param i32)))
    (import "env" "base" (global $base i32))
    (memory $mem 1)
    (table $tab 2 funcref)
    (global $counter (mut i32) (i32.const 0))
    (func $mul (type $binop)
        local.get 0
        local.get 1
        i32.mul
    )
    (func $bump (result i32) (local $tmp i32)
        global.get $counter
        i32.const 1
        i32.add
        local.tee $tmp
        global.set $counter
        local.get $tmp
    )
    (elem (i32.const 0) $mul $bump)
    (data (i32.const 16) "hello")
    (export "mul" (func $mul))
    (export "bump" (func $bump))
    (export "memory" (memory $mem))
)
"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn runtime() -> NativeRuntime {
    init_logging();
    NativeRuntime::default()
}

/// Allocator-level counters, shared with the test after the allocator has
/// been moved into a runtime.
#[derive(Debug, Default)]
pub struct AllocatorLog {
    pub mallocs: usize,
    pub frees: usize,
    pub failed: usize,
}

/// Wraps [`LinearMemory`], recording every call and failing every
/// allocation once `budget` successful ones have been made.
pub struct TrackingAllocator {
    inner: LinearMemory,
    budget: Option<usize>,
    log: Rc<RefCell<AllocatorLog>>,
}

impl TrackingAllocator {
    pub fn unlimited() -> (Self, Rc<RefCell<AllocatorLog>>) {
        Self::with_budget(None)
    }

    /// Fails every allocation after the first `budget`.
    pub fn failing_after(budget: usize) -> (Self, Rc<RefCell<AllocatorLog>>) {
        Self::with_budget(Some(budget))
    }

    fn with_budget(budget: Option<usize>) -> (Self, Rc<RefCell<AllocatorLog>>) {
        let log = Rc::new(RefCell::new(AllocatorLog::default()));
        let allocator = Self {
            inner: LinearMemory::default(),
            budget,
            log: Rc::clone(&log),
        };
        (allocator, log)
    }
}

impl Allocator for TrackingAllocator {
    fn malloc(&mut self, size: u32) -> u32 {
        let mut log = self.log.borrow_mut();
        if self.budget.is_some_and(|budget| log.mallocs >= budget) {
            log.failed += 1;
            return 0;
        }
        let address = self.inner.malloc(size);
        if address != 0 {
            log.mallocs += 1;
        }
        address
    }

    fn free(&mut self, address: u32) {
        self.log.borrow_mut().frees += 1;
        self.inner.free(address);
    }

    fn heap(&self) -> &[u8] {
        self.inner.heap()
    }

    fn heap_mut(&mut self) -> &mut [u8] {
        self.inner.heap_mut()
    }
}

pub fn tracked_runtime(allocator: TrackingAllocator) -> NativeRuntime {
    init_logging();
    NativeRuntime::with_allocator(BridgeConfig::default(), Box::new(allocator))
        .expect("default config is valid")
}

/// Instantiate `wasm` with wasmtime and call an `(i32, i32) -> i32` export.
pub fn call_i32_i32(wasm: &[u8], name: &str, a: i32, b: i32) -> i32 {
    let engine = wasmtime::Engine::default();
    let module = wasmtime::Module::new(&engine, wasm).expect("wasmtime rejected module");
    let mut store = wasmtime::Store::new(&engine, ());
    let instance =
        wasmtime::Instance::new(&mut store, &module, &[]).expect("failed to instantiate");
    let func = instance
        .get_typed_func::<(i32, i32), i32>(&mut store, name)
        .expect("missing export");
    func.call(&mut store, (a, b)).expect("call trapped")
}
