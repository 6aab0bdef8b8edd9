//! Connection state machine.

use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub channel_machine(Disconnected)

    Disconnected => {
        Connect => Connecting
    },
    Connecting => {
        Opened => Connected,
        Failed => Disconnected,
        CloseRequested => Closing
    },
    Connected => {
        Dropped => Disconnected,
        CloseRequested => Closing
    },
    Closing => {
        Closed => Disconnected
    }
}

pub use channel_machine::Input as ChannelMachineInput;
pub use channel_machine::State as ChannelMachineState;
pub use channel_machine::StateMachine as ChannelMachine;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl From<&ChannelMachineState> for ConnectionState {
    fn from(state: &ChannelMachineState) -> Self {
        match state {
            ChannelMachineState::Disconnected => ConnectionState::Disconnected,
            ChannelMachineState::Connecting => ConnectionState::Connecting,
            ChannelMachineState::Connected => ConnectionState::Connected,
            ChannelMachineState::Closing => ConnectionState::Closing,
        }
    }
}
