mod interaction;
mod respondent;

pub use interaction::{Interaction, SubcategoryEntry};
pub use respondent::Respondent;
