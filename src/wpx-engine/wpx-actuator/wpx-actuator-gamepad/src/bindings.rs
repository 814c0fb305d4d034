// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use wpx_core::actuator::LogicalAction;

/// Digital buttons of the virtual pad, with their report bit masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PadButton {
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Start,
    Back,
    LeftThumb,
    RightThumb,
    LeftShoulder,
    RightShoulder,
    A,
    B,
    X,
    Y,
}

impl PadButton {
    pub fn mask(&self) -> u16 {
        match self {
            Self::DPadUp => 0x0001,
            Self::DPadDown => 0x0002,
            Self::DPadLeft => 0x0004,
            Self::DPadRight => 0x0008,
            Self::Start => 0x0010,
            Self::Back => 0x0020,
            Self::LeftThumb => 0x0040,
            Self::RightThumb => 0x0080,
            Self::LeftShoulder => 0x0100,
            Self::RightShoulder => 0x0200,
            Self::A => 0x1000,
            Self::B => 0x2000,
            Self::X => 0x4000,
            Self::Y => 0x8000,
        }
    }
}

/// How a logical action is expressed on the pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PadBinding {
    Button(PadButton),
    /// Full-scale pull of the left or right trigger.
    Trigger { left: bool },
    /// Hold `modifier`, then press `main`.
    Combo { modifier: PadButton, main: PadButton },
}

/// Logical action to pad input table.
#[derive(Debug, Clone, PartialEq)]
pub struct GamepadBindings {
    map: HashMap<LogicalAction, PadBinding>,
}

impl Default for GamepadBindings {
    fn default() -> Self {
        use LogicalAction::*;
        let map = HashMap::from([
            (NormalAttack, PadBinding::Button(PadButton::X)),
            (ElementalSkill, PadBinding::Button(PadButton::RightShoulder)),
            (ElementalBurst, PadBinding::Trigger { left: false }),
            (Jump, PadBinding::Button(PadButton::A)),
            (Sprint, PadBinding::Button(PadButton::B)),
            (Drop, PadBinding::Button(PadButton::B)),
            (PickUpOrInteract, PadBinding::Button(PadButton::Y)),
            (SwitchMember1, PadBinding::Button(PadButton::DPadUp)),
            (SwitchMember2, PadBinding::Button(PadButton::DPadRight)),
            (SwitchMember3, PadBinding::Button(PadButton::DPadLeft)),
            (SwitchMember4, PadBinding::Button(PadButton::DPadDown)),
            (OpenMenu, PadBinding::Button(PadButton::Start)),
        ]);
        Self { map }
    }
}

impl GamepadBindings {
    pub fn get(&self, action: LogicalAction) -> Option<PadBinding> {
        self.map.get(&action).copied()
    }

    pub fn set(&mut self, action: LogicalAction, binding: PadBinding) {
        self.map.insert(action, binding);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bindings() {
        let bindings = GamepadBindings::default();
        assert_eq!(
            bindings.get(LogicalAction::Jump),
            Some(PadBinding::Button(PadButton::A))
        );
        assert_eq!(
            bindings.get(LogicalAction::ElementalBurst),
            Some(PadBinding::Trigger { left: false })
        );
        // Movement and the map are not button bindings.
        assert!(bindings.get(LogicalAction::MoveForward).is_none());
        assert!(bindings.get(LogicalAction::OpenMap).is_none());
    }

    #[test]
    fn test_masks_are_distinct() {
        let buttons = [
            PadButton::DPadUp,
            PadButton::DPadDown,
            PadButton::DPadLeft,
            PadButton::DPadRight,
            PadButton::Start,
            PadButton::Back,
            PadButton::LeftThumb,
            PadButton::RightThumb,
            PadButton::LeftShoulder,
            PadButton::RightShoulder,
            PadButton::A,
            PadButton::B,
            PadButton::X,
            PadButton::Y,
        ];
        let combined = buttons.iter().fold(0u16, |acc, b| {
            assert_eq!(acc & b.mask(), 0);
            acc | b.mask()
        });
        assert_eq!(combined.count_ones(), buttons.len() as u32);
    }

    #[test]
    fn test_override_binding() {
        let mut bindings = GamepadBindings::default();
        bindings.set(
            LogicalAction::ElementalSkill,
            PadBinding::Combo {
                modifier: PadButton::LeftShoulder,
                main: PadButton::X,
            },
        );
        assert!(matches!(
            bindings.get(LogicalAction::ElementalSkill),
            Some(PadBinding::Combo { .. })
        ));
    }
}
