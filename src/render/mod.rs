pub mod bubble;
pub mod canvas;
pub mod layout;
pub mod placeholder;
pub mod text;
