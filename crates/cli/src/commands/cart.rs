//! Cart commands.

use std::str::FromStr;

use cartwheel_client::ClientState;
use cartwheel_core::{CurrencyCode, Price, ProductId, ProductSnapshot};
use rust_decimal::Decimal;

use super::CliError;

pub fn add(
    client: &ClientState,
    id: i64,
    name: String,
    price: &str,
    quantity: u32,
) -> Result<(), CliError> {
    let price = parse_price(price)?;
    let product = ProductSnapshot::new(ProductId::new(id), name, price);
    client.cart().add_item(product, quantity);
    Ok(())
}

pub fn remove(client: &ClientState, id: i64) {
    client.cart().remove_item(ProductId::new(id));
}

pub fn set(client: &ClientState, id: i64, quantity: i64) {
    client.cart().update_quantity(ProductId::new(id), quantity);
}

pub fn clear(client: &ClientState) {
    client.cart().clear_cart();
}

/// Print cart lines and totals.
#[allow(clippy::print_stdout)]
pub fn show(client: &ClientState) {
    let cart = client.cart().cart();
    let currency = CurrencyCode::default();

    if cart.is_empty() {
        println!("Cart is empty");
        return;
    }

    for line in cart.lines() {
        println!(
            "{:>6}  {:<32} {:>3} x {:>10} = {:>10}",
            line.product.id,
            line.product.name,
            line.quantity,
            line.product.price.display(currency),
            line.subtotal().display(currency),
        );
    }
    println!(
        "{} item(s), total {}",
        cart.total_items(),
        cart.total_price().display(currency)
    );
}

fn parse_price(raw: &str) -> Result<Price, CliError> {
    let amount = Decimal::from_str(raw.trim()).map_err(|e| CliError::InvalidPrice(e.to_string()))?;
    if amount.is_sign_negative() {
        return Err(CliError::InvalidPrice(format!("{raw} is negative")));
    }
    Ok(Price::new(amount))
}
