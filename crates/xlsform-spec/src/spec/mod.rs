pub mod choices;
pub mod form;
pub mod question;

pub use choices::{Choice, ChoiceList, RESERVED_CHOICE_COLUMNS, is_filter_column};
pub use form::FormSpec;
pub use question::{CascadeSpec, Constraint, QuestionSpec, QuestionType};
