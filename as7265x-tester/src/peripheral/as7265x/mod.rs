//! AS7265x spectral sensor triad.
//!
//! The AS72651 master answers at 0x49 and fronts two slave dies (AS72652,
//! AS72653). The host never touches sensor registers directly: it talks to
//! three physical registers and runs a polled handshake to reach the virtual
//! register file behind them.

pub mod channel;
pub mod registers;
pub mod selector;
pub mod sim;
pub mod status;

pub use channel::{Phase, PollBudget, ProtocolError, VirtualRegisterChannel};
pub use registers::{
    identity, virt, DeviceId, InvalidVirtualAddress, PhysicalRegister, VirtualAddress,
    SLAVE_ADDRESS, WRITE_BIT,
};
pub use selector::DeviceSelector;
pub use sim::{SimulatedAs7265x, SimulatedResetPin};
pub use status::{StatusDecoder, StatusFlags};
