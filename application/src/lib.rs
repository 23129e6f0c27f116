pub mod chat_controller;

pub use chat_controller::{ChatController, ChatEvent, SEND_FAILURE_MESSAGE, WELCOME_MESSAGE};
