mod account;
mod asset;
mod indicators;
mod integrity;
mod ledger;
mod loan;
mod money;
mod month;
mod recurring;
mod transaction;

pub use account::*;
pub use asset::*;
pub use indicators::*;
pub use integrity::*;
pub use ledger::*;
pub use loan::*;
pub use money::*;
pub use month::*;
pub use recurring::*;
pub use transaction::*;
