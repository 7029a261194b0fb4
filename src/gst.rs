pub const GST_RATE: f64 = 0.18;

/// GST owed on `base`. No rounding here; display code rounds to paise.
pub fn gst_amount(base: f64, included: bool) -> f64 {
    if !included {
        return 0.0;
    }
    base * GST_RATE
}

/// Base plus GST, used to pre-fill collection amounts.
pub fn gst_inclusive_total(base: f64, included: bool) -> f64 {
    base + gst_amount(base, included)
}
