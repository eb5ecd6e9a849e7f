// Wire and request-level types shared by the engine and the HTTP surface
pub mod conversation;
pub mod generate;
