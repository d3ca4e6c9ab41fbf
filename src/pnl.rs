// ===============================
// src/pnl.rs
// ===============================
//
// Profit/loss murni dari (harga sekarang, parameter posisi). Tanpa state.
//
// Urutan status (yang pertama cocok menang):
//   1) price >= purchase              -> Profit
//   2) price <= stop && stop > 0      -> StopLossTriggered
//   3) selain itu                     -> Loss
// Catatan: kalau stop > purchase, harga di antara keduanya tetap Profit.
// Perilaku ini dipertahankan; maksud produknya belum jelas.
//
use crate::domain::{PnlStatus, PositionParameters, ProfitLossResult};

pub fn evaluate(current_price: f64, investment: f64, purchase_price: f64, stop_price: f64) -> ProfitLossResult {
    if purchase_price == 0.0 {
        return ProfitLossResult { profit: 0.0, status: PnlStatus::Unset };
    }

    let crypto_amount = investment / purchase_price;
    let profit = crypto_amount * current_price - investment;

    let status = if current_price >= purchase_price {
        PnlStatus::Profit
    } else if current_price <= stop_price && stop_price > 0.0 {
        PnlStatus::StopLossTriggered
    } else {
        PnlStatus::Loss
    };

    ProfitLossResult { profit, status }
}

pub fn evaluate_position(current_price: f64, p: &PositionParameters) -> ProfitLossResult {
    evaluate(current_price, p.investment, p.purchase_price, p.stop_price)
}
