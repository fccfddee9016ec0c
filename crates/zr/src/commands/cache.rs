//! `zr cache`: cache maintenance.

use zr_core::{CacheStore, Result};

pub fn clear() -> Result<i32> {
    let store = CacheStore::open_default()?;
    let removed = store.clear_all()?;
    println!("removed {removed} cache entr{}", if removed == 1 { "y" } else { "ies" });
    Ok(0)
}
