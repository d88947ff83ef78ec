//! Math Library
//!
//! `math.*` functions over the engine's `f64` numbers. `math.random` draws
//! from a per-thread `StdRng` that `math.randomseed` reseeds.

use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::lua::error::LuaResult;
use crate::lua::value::Value;
use crate::lua::varargs::Varargs;
use crate::lua::vm::{ExecutionContext, LibFunction, LuaVM};

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

/// Initialize the math library
pub fn init_math_lib(vm: &LuaVM) -> LuaResult<()> {
    let functions: [(&str, LibFunction); 18] = [
        ("abs", math_abs),
        ("ceil", math_ceil),
        ("floor", math_floor),
        ("sqrt", math_sqrt),
        ("sin", math_sin),
        ("cos", math_cos),
        ("tan", math_tan),
        ("exp", math_exp),
        ("log", math_log),
        ("max", math_max),
        ("min", math_min),
        ("fmod", math_fmod),
        ("modf", math_modf),
        ("pow", math_pow),
        ("random", math_random),
        ("randomseed", math_randomseed),
        ("deg", math_deg),
        ("rad", math_rad),
    ];

    let math = vm.register_library("math", &functions)?;
    math.set_str("huge", Value::Number(f64::INFINITY))?;
    math.set_str("pi", Value::Number(std::f64::consts::PI))?;
    Ok(())
}

fn unary(ctx: &ExecutionContext<'_>, f: fn(f64) -> f64) -> LuaResult<Varargs> {
    Ok(Varargs::one(f(ctx.check_number(0)?)))
}

fn math_abs(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::abs)
}

fn math_ceil(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::ceil)
}

fn math_floor(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::floor)
}

fn math_sqrt(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::sqrt)
}

fn math_sin(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::sin)
}

fn math_cos(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::cos)
}

fn math_tan(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::tan)
}

fn math_exp(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::exp)
}

fn math_deg(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::to_degrees)
}

fn math_rad(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    unary(ctx, f64::to_radians)
}

/// `math.log(x [, base])`
fn math_log(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let x = ctx.check_number(0)?;
    let result = if ctx.arg(1).is_nil() {
        x.ln()
    } else {
        let base = ctx.check_number(1)?;
        if base == 2.0 {
            x.log2()
        } else if base == 10.0 {
            x.log10()
        } else {
            x.ln() / base.ln()
        }
    };
    Ok(Varargs::one(result))
}

fn fold(ctx: &ExecutionContext<'_>, pick: fn(f64, f64) -> bool) -> LuaResult<Varargs> {
    let mut best = ctx.check_number(0)?;
    for i in 1..ctx.arg_count() {
        let n = ctx.check_number(i)?;
        if pick(n, best) {
            best = n;
        }
    }
    Ok(Varargs::one(best))
}

fn math_max(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    fold(ctx, |n, best| n > best)
}

fn math_min(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    fold(ctx, |n, best| n < best)
}

/// Remainder truncated toward zero, unlike `%`
fn math_fmod(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let a = ctx.check_number(0)?;
    let b = ctx.check_number(1)?;
    Ok(Varargs::one(a % b))
}

fn math_modf(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let x = ctx.check_number(0)?;
    let int = x.trunc();
    let frac = if x.is_infinite() { 0.0 } else { x - int };
    Ok(Varargs::from(vec![Value::Number(int), Value::Number(frac)]))
}

fn math_pow(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let a = ctx.check_number(0)?;
    let b = ctx.check_number(1)?;
    Ok(Varargs::one(a.powf(b)))
}

/// `random()` in [0, 1), `random(m)` in [1, m], `random(m, n)` in [m, n]
fn math_random(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let (low, high) = match ctx.arg_count() {
        0 => return Ok(Varargs::one(RNG.with(|rng| rng.borrow_mut().gen::<f64>()))),
        1 => (1, ctx.check_integer(0)?),
        2 => (ctx.check_integer(0)?, ctx.check_integer(1)?),
        _ => return Err(ctx.bad_argument(2, "wrong number of arguments")),
    };
    if low > high {
        let index = if ctx.arg_count() == 1 { 0 } else { 1 };
        return Err(ctx.bad_argument(index, "interval is empty"));
    }
    let n = RNG.with(|rng| rng.borrow_mut().gen_range(low..=high));
    Ok(Varargs::one(n as f64))
}

fn math_randomseed(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let seed = ctx.check_number(0)?;
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed.to_bits()));
    Ok(Varargs::empty())
}
