//! Keyboard controls for the windowed mode

use winit::keyboard::KeyCode;

/// Something the user can change while the pipeline runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlAction {
    /// Freeze / resume the simulated head motion
    TogglePause,
    /// Step the fragment workload level (wraps to 0)
    CycleFragmentLevel,
    /// Step the artificial render delay (wraps to 0)
    CycleRenderDelay,
    ToggleChromaticAberration,
    /// Print the current statistics to the log
    LogStats,
    Quit,
}

/// Map a key to its control action
pub fn action_for_key(key: KeyCode) -> Option<ControlAction> {
    match key {
        KeyCode::KeyP => Some(ControlAction::TogglePause),
        KeyCode::KeyL => Some(ControlAction::CycleFragmentLevel),
        KeyCode::KeyD => Some(ControlAction::CycleRenderDelay),
        KeyCode::KeyC => Some(ControlAction::ToggleChromaticAberration),
        KeyCode::KeyS => Some(ControlAction::LogStats),
        KeyCode::Escape => Some(ControlAction::Quit),
        _ => None,
    }
}

/// Help text listing the bindings above
pub const KEY_HELP: &str = "P: pause motion | L: fragment level | D: render delay | C: chromatic aberration | S: stats | Esc: quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings() {
        assert_eq!(action_for_key(KeyCode::KeyP), Some(ControlAction::TogglePause));
        assert_eq!(action_for_key(KeyCode::Escape), Some(ControlAction::Quit));
        assert_eq!(action_for_key(KeyCode::KeyZ), None);
    }
}
