pub mod rank;

pub use rank::{select_items, Selection};
