pub mod packet;
pub mod receiver;
pub mod seqnum;
pub mod storage;

pub use packet::{ArrivalTime, PacketError, PacketRef, RtpPacket};
pub use receiver::{RecoveryRequest, ReceiverSettings, ReceiverStats, StorageReceiver};
pub use storage::{StoredPacket, StreamBuffer, StreamStats};
