//! Keyboard bindings.

pub use winit::event::ElementState;
pub use winit::keyboard::KeyCode;

/// Actions the application reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    Quit,
}

/// Maps a key transition to an application command.
///
/// Commands fire on press only.
pub fn command_for_key(code: KeyCode, state: ElementState) -> Option<AppCommand> {
    if state != ElementState::Pressed {
        return None;
    }
    match code {
        KeyCode::Escape => Some(AppCommand::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_press_quits() {
        assert_eq!(
            command_for_key(KeyCode::Escape, ElementState::Pressed),
            Some(AppCommand::Quit)
        );
    }

    #[test]
    fn test_release_and_other_keys_ignored() {
        assert_eq!(command_for_key(KeyCode::Escape, ElementState::Released), None);
        assert_eq!(command_for_key(KeyCode::Space, ElementState::Pressed), None);
    }
}
