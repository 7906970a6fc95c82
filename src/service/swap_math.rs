//! Concentrated-liquidity swap math for a single, in-range liquidity position.
//!
//! Rounding follows the pool contracts: amounts the trader pays round up, amounts the
//! trader receives round down. Intermediate products are widened to 512 bits.

use alloy::primitives::{U256, U512, uint};

const RESOLUTION: usize = 96;
const FEE_DENOMINATOR: u64 = 1_000_000;

/// Lowest sqrt price a pool can reach, `getSqrtRatioAtTick(MIN_TICK)`.
pub const MIN_SQRT_RATIO: U256 = uint!(4295128739_U256);
/// Highest sqrt price a pool can reach, `getSqrtRatioAtTick(MAX_TICK)`.
pub const MAX_SQRT_RATIO: U256 = uint!(1461446703485210103287273052203988822378723970342_U256);

pub type MathResult<T> = Result<T, String>;

fn widen(x: U256) -> U512 {
    U512::from_limbs_slice(x.as_limbs())
}

fn narrow(x: U512) -> MathResult<U256> {
    let limbs = x.as_limbs();
    if limbs[4..].iter().any(|limb| *limb != 0) {
        return Err("intermediate value overflows 256 bits".to_string());
    }
    Ok(U256::from_limbs_slice(&limbs[..4]))
}

fn div_ceil(a: U512, b: U512) -> U512 {
    let (quotient, remainder) = a.div_rem(b);
    if remainder.is_zero() {
        quotient
    } else {
        quotient + U512::from(1u8)
    }
}

/// Token0 between two sqrt prices: `L·2^96·(sb − sa) / sb / sa`.
fn amount0_delta(sa: U256, sb: U256, liquidity: U512, round_up: bool) -> MathResult<U256> {
    let (sa, sb) = if sa < sb { (sa, sb) } else { (sb, sa) };
    if sa.is_zero() {
        return Err("sqrt price is zero".to_string());
    }

    let numerator = (liquidity << RESOLUTION) * widen(sb - sa);
    let amount = if round_up {
        div_ceil(div_ceil(numerator, widen(sb)), widen(sa))
    } else {
        numerator / widen(sb) / widen(sa)
    };
    narrow(amount)
}

/// Token1 between two sqrt prices: `L·(sb − sa) / 2^96`.
fn amount1_delta(sa: U256, sb: U256, liquidity: U512, round_up: bool) -> MathResult<U256> {
    let (sa, sb) = if sa < sb { (sa, sb) } else { (sb, sa) };

    let numerator = liquidity * widen(sb - sa);
    let q96 = U512::from(1u8) << RESOLUTION;
    let amount = if round_up {
        div_ceil(numerator, q96)
    } else {
        numerator / q96
    };
    narrow(amount)
}

fn check_bounds(sqrt_price: U256) -> MathResult<U256> {
    if sqrt_price <= MIN_SQRT_RATIO || sqrt_price >= MAX_SQRT_RATIO {
        return Err("swap moves the price past the pool's limits".to_string());
    }
    Ok(sqrt_price)
}

/// Input (fee included) needed to take exactly `amount_out` out of the pool.
///
/// `zero_for_one` means token0 is paid in and token1 comes out. Fails when the pool
/// has no active liquidity or the output exceeds what the current range can supply.
pub fn exact_output_amount_in(
    sqrt_price_x96: U256,
    liquidity: u128,
    fee: u32,
    amount_out: U256,
    zero_for_one: bool,
) -> MathResult<U256> {
    if liquidity == 0 {
        return Err("pool has no active liquidity".to_string());
    }
    if u64::from(fee) >= FEE_DENOMINATOR {
        return Err(format!("invalid fee {fee}"));
    }

    let l = U512::from(liquidity);
    let price = widen(sqrt_price_x96);

    let amount_in = if zero_for_one {
        // price falls by ceil(amountOut·2^96 / L)
        let step = narrow(div_ceil(widen(amount_out) << RESOLUTION, l))?;
        if step >= sqrt_price_x96 {
            return Err("output exceeds liquidity in range".to_string());
        }
        let next = check_bounds(sqrt_price_x96 - step)?;
        amount0_delta(next, sqrt_price_x96, l, true)?
    } else {
        // price rises to ceil(L·2^96·P / (L·2^96 − amountOut·P))
        let scaled = l << RESOLUTION;
        let product = widen(amount_out) * price;
        if product >= scaled {
            return Err("output exceeds liquidity in range".to_string());
        }
        let next = check_bounds(narrow(div_ceil(scaled * price, scaled - product))?)?;
        amount1_delta(sqrt_price_x96, next, l, true)?
    };

    let fee_amount = div_ceil(
        widen(amount_in) * U512::from(fee),
        U512::from(FEE_DENOMINATOR - u64::from(fee)),
    );
    narrow(widen(amount_in) + fee_amount)
}

/// Output received for paying exactly `amount_in` (fee included) into the pool.
pub fn exact_input_amount_out(
    sqrt_price_x96: U256,
    liquidity: u128,
    fee: u32,
    amount_in: U256,
    zero_for_one: bool,
) -> MathResult<U256> {
    if liquidity == 0 {
        return Err("pool has no active liquidity".to_string());
    }
    if u64::from(fee) >= FEE_DENOMINATOR {
        return Err(format!("invalid fee {fee}"));
    }

    let l = U512::from(liquidity);
    let price = widen(sqrt_price_x96);
    let net = widen(amount_in) * U512::from(FEE_DENOMINATOR - u64::from(fee))
        / U512::from(FEE_DENOMINATOR);

    if zero_for_one {
        let scaled = l << RESOLUTION;
        let next = narrow(div_ceil(scaled * price, scaled + net * price))?;
        let next = check_bounds(next)?;
        amount1_delta(next, sqrt_price_x96, l, false)
    } else {
        let step = narrow((net << RESOLUTION) / l)?;
        let next = check_bounds(sqrt_price_x96.saturating_add(step))?;
        amount0_delta(sqrt_price_x96, next, l, false)
    }
}
