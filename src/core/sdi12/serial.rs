use serialport::{DataBits, FlowControl, Parity, StopBits};

pub const BAUD_RATE: u32 = 1200;
pub const DATA_BITS: DataBits = DataBits::Seven;
pub const STOP_BITS: StopBits = StopBits::One;
pub const PARITY: Parity = Parity::Even;
pub const FLOW_CONTROL: FlowControl = FlowControl::None;
