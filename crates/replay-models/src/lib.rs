mod echo;
mod scripted;

pub use echo::EchoModel;
pub use scripted::ScriptedModel;
