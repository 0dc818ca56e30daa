//! RTCP packet and report-block parsing (RFC 3550 §6).

use crate::byte_order::read_be;
use crate::error::VerificationResult;
use crate::ntp::NtpTimestamp;
use crate::view::View;

/// A single 24-byte RTCP reception report block.
#[derive(Clone, Copy)]
pub struct RtcpReportBlockView<'a> {
    data: &'a [u8],
}

impl<'a> RtcpReportBlockView<'a> {
    pub const LENGTH: usize = 24;

    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn empty() -> Self {
        Self { data: &[] }
    }

    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }

    /// A report block is fixed at exactly 24 bytes; both a shorter and a
    /// longer slice are rejected (the original's behavior, stricter than
    /// "at least 24").
    pub fn validate(&self) -> VerificationResult {
        if self.data.is_empty() {
            return VerificationResult::InvalidPointer;
        }
        if self.data.len() != Self::LENGTH {
            return VerificationResult::InvalidReportBlockLength;
        }
        VerificationResult::Ok
    }

    pub fn ssrc(&self) -> u32 {
        self.field(0, 4, read_be::<u32>)
    }

    pub fn fraction_lost(&self) -> u8 {
        self.data.get(4).copied().unwrap_or(0)
    }

    pub fn number_of_packets_lost(&self) -> u32 {
        if self.data.len() < 8 {
            return 0;
        }
        let packets_lost = [0u8, self.data[5], self.data[6], self.data[7]];
        read_be::<u32>(&packets_lost)
    }

    pub fn extended_highest_sequence_number_received(&self) -> u32 {
        self.field(8, 4, read_be::<u32>)
    }

    pub fn inter_arrival_jitter(&self) -> u32 {
        self.field(12, 4, read_be::<u32>)
    }

    pub fn last_sr_timestamp(&self) -> NtpTimestamp {
        NtpTimestamp::from_compact(self.field(16, 4, read_be::<u32>))
    }

    pub fn delay_since_last_sr(&self) -> u32 {
        self.field(20, 4, read_be::<u32>)
    }

    fn field<T: Default>(&self, offset: usize, width: usize, reader: impl Fn(&[u8]) -> T) -> T {
        if self.data.len() < offset + width {
            return T::default();
        }
        reader(&self.data[offset..])
    }
}

/// RTCP packet types as carried in byte 1 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Unknown,
    SenderReport,
    ReceiverReport,
    SourceDescriptionItems,
    Bye,
    App,
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PacketType::SenderReport => "SenderReport",
            PacketType::ReceiverReport => "ReceiverReport",
            PacketType::SourceDescriptionItems => "SourceDescriptionItems",
            PacketType::Bye => "Bye",
            PacketType::App => "App",
            PacketType::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

const HEADER_LENGTH: usize = 8;
const NTP_TIMESTAMP_HALF_LENGTH: usize = 4;
const NTP_TIMESTAMP_FULL_LENGTH: usize = NTP_TIMESTAMP_HALF_LENGTH * 2;
const RTP_TIMESTAMP_LENGTH: usize = 4;
const PACKET_COUNT_LENGTH: usize = 4;
const OCTET_COUNT_LENGTH: usize = 4;
const SENDER_INFO_LENGTH: usize =
    NTP_TIMESTAMP_FULL_LENGTH + RTP_TIMESTAMP_LENGTH + PACKET_COUNT_LENGTH + OCTET_COUNT_LENGTH;

/// A non-owning view over a single RTCP packet, possibly one of several
/// compound packets sharing a buffer.
#[derive(Clone, Copy)]
pub struct RtcpView<'a> {
    data: &'a [u8],
}

impl<'a> RtcpView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn empty() -> Self {
        Self { data: &[] }
    }

    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn validate(&self) -> VerificationResult {
        if self.data.is_empty() {
            return VerificationResult::InvalidPointer;
        }
        if self.data.len() < HEADER_LENGTH {
            return VerificationResult::InvalidHeaderLength;
        }
        if self.version() != 2 {
            return VerificationResult::InvalidVersion;
        }
        if self.packet_type() == PacketType::SenderReport
            && self.data.len() < HEADER_LENGTH + SENDER_INFO_LENGTH
        {
            return VerificationResult::InvalidSenderInfoLength;
        }
        VerificationResult::Ok
    }

    pub fn version(&self) -> u8 {
        self.byte(0).map_or(0, |b| (b & 0b1100_0000) >> 6)
    }

    pub fn padding(&self) -> bool {
        self.byte(0).is_some_and(|b| (b & 0b0010_0000) != 0)
    }

    pub fn reception_report_count(&self) -> u8 {
        self.byte(0).map_or(0, |b| b & 0b0001_1111)
    }

    pub fn packet_type(&self) -> PacketType {
        match self.byte(1) {
            Some(200) => PacketType::SenderReport,
            Some(201) => PacketType::ReceiverReport,
            Some(202) => PacketType::SourceDescriptionItems,
            Some(203) => PacketType::Bye,
            Some(204) => PacketType::App,
            _ => PacketType::Unknown,
        }
    }

    /// Reported packet length in 32-bit words, decoded as `wire + 1`.
    pub fn length(&self) -> u16 {
        if self.data.len() < 2 + 2 {
            return 0;
        }
        read_be::<u16>(&self.data[2..]) + 1
    }

    pub fn ssrc(&self) -> u32 {
        self.field(4, 4, read_be::<u32>)
    }

    pub fn ntp_timestamp(&self) -> NtpTimestamp {
        if self.packet_type() != PacketType::SenderReport {
            return NtpTimestamp::default();
        }
        if self.data.len() < HEADER_LENGTH + NTP_TIMESTAMP_FULL_LENGTH {
            return NtpTimestamp::default();
        }
        NtpTimestamp::new(
            read_be::<u32>(&self.data[HEADER_LENGTH..]),
            read_be::<u32>(&self.data[HEADER_LENGTH + NTP_TIMESTAMP_HALF_LENGTH..]),
        )
    }

    pub fn rtp_timestamp(&self) -> u32 {
        if self.packet_type() != PacketType::SenderReport {
            return 0;
        }
        self.field(
            HEADER_LENGTH + NTP_TIMESTAMP_FULL_LENGTH,
            RTP_TIMESTAMP_LENGTH,
            read_be::<u32>,
        )
    }

    pub fn packet_count(&self) -> u32 {
        if self.packet_type() != PacketType::SenderReport {
            return 0;
        }
        self.field(
            HEADER_LENGTH + NTP_TIMESTAMP_FULL_LENGTH + RTP_TIMESTAMP_LENGTH,
            PACKET_COUNT_LENGTH,
            read_be::<u32>,
        )
    }

    pub fn octet_count(&self) -> u32 {
        if self.packet_type() != PacketType::SenderReport {
            return 0;
        }
        self.field(
            HEADER_LENGTH + NTP_TIMESTAMP_FULL_LENGTH + RTP_TIMESTAMP_LENGTH + PACKET_COUNT_LENGTH,
            OCTET_COUNT_LENGTH,
            read_be::<u32>,
        )
    }

    pub fn get_report_block(&self, index: usize) -> RtcpReportBlockView<'a> {
        if index >= self.reception_report_count() as usize {
            return RtcpReportBlockView::empty();
        }

        let mut offset = HEADER_LENGTH;
        if self.packet_type() == PacketType::SenderReport {
            offset += SENDER_INFO_LENGTH;
        }

        let block_end = offset + RtcpReportBlockView::LENGTH * (index + 1);
        if self.data.len() < block_end {
            return RtcpReportBlockView::empty();
        }

        let block_start = offset + RtcpReportBlockView::LENGTH * index;
        RtcpReportBlockView::new(&self.data[block_start..block_start + RtcpReportBlockView::LENGTH])
    }

    /// Bytes between the last report block and the packet's reported
    /// length, or empty when the offsets are inconsistent.
    pub fn profile_specific_extension(&self) -> View<'a, u8> {
        if self.data.is_empty() {
            return View::empty();
        }

        let mut offset =
            HEADER_LENGTH + RtcpReportBlockView::LENGTH * self.reception_report_count() as usize;
        if self.packet_type() == PacketType::SenderReport {
            offset += SENDER_INFO_LENGTH;
        }

        let reported_length = self.length() as usize * 4;

        if offset >= self.data.len() || reported_length > self.data.len() || reported_length < offset {
            return View::empty();
        }

        View::new(&self.data[offset..reported_length])
    }

    pub fn get_next_packet(&self) -> RtcpView<'a> {
        if self.data.is_empty() {
            return RtcpView::empty();
        }
        let reported_length = self.length() as usize * 4;
        if reported_length >= self.data.len() {
            return RtcpView::empty();
        }
        RtcpView::new(&self.data[reported_length..])
    }

    fn byte(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    fn field<T: Default>(&self, offset: usize, width: usize, reader: impl Fn(&[u8]) -> T) -> T {
        if self.data.len() < offset + width {
            return T::default();
        }
        reader(&self.data[offset..])
    }
}

impl std::fmt::Display for RtcpView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RTCP Packet valid={} | Header version={} padding={} reception_report_count={} packet_type={} \
             length={} ssrc={}",
            self.validate().is_ok(),
            self.version(),
            self.padding(),
            self.reception_report_count(),
            self.packet_type(),
            self.length(),
            self.ssrc(),
        )?;

        if self.packet_type() == PacketType::SenderReport {
            write!(
                f,
                " | Sender info ntp={} rtp={} packet_count={} octet_count={}",
                self.ntp_timestamp(),
                self.rtp_timestamp(),
                self.packet_count(),
                self.octet_count(),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver_report(report_blocks: usize) -> Vec<u8> {
        let mut packet = vec![0u8; HEADER_LENGTH];
        packet[0] = 0b1000_0000 | report_blocks as u8;
        packet[1] = 201;
        let words = (HEADER_LENGTH + RtcpReportBlockView::LENGTH * report_blocks) / 4 - 1;
        packet[2..4].copy_from_slice(&(words as u16).to_be_bytes());
        packet[4..8].copy_from_slice(&0xcafe_babeu32.to_be_bytes());
        for i in 0..report_blocks {
            let mut block = vec![0u8; RtcpReportBlockView::LENGTH];
            block[0..4].copy_from_slice(&(i as u32 + 1).to_be_bytes());
            packet.extend_from_slice(&block);
        }
        packet
    }

    #[test]
    fn validates_receiver_report() {
        let packet = receiver_report(2);
        let view = RtcpView::new(&packet);
        assert_eq!(view.validate(), VerificationResult::Ok);
        assert_eq!(view.packet_type(), PacketType::ReceiverReport);
        assert_eq!(view.reception_report_count(), 2);
        assert_eq!(view.ssrc(), 0xcafe_babe);
    }

    #[test]
    fn length_round_trips_words_minus_one() {
        let packet = receiver_report(1);
        let view = RtcpView::new(&packet);
        assert_eq!(view.length() as usize * 4, packet.len());
    }

    #[test]
    fn report_block_boundary() {
        let packet = receiver_report(2);
        let view = RtcpView::new(&packet);

        let last_valid = view.get_report_block(1);
        assert!(last_valid.is_valid());
        assert_eq!(last_valid.ssrc(), 2);

        let out_of_range = view.get_report_block(2);
        assert!(!out_of_range.is_valid());
    }

    #[test]
    fn report_block_rejects_wrong_length() {
        let short = RtcpReportBlockView::new(&[0u8; 23]);
        assert_eq!(short.validate(), VerificationResult::InvalidReportBlockLength);

        let long = RtcpReportBlockView::new(&[0u8; 25]);
        assert_eq!(long.validate(), VerificationResult::InvalidReportBlockLength);

        let exact = RtcpReportBlockView::new(&[0u8; 24]);
        assert_eq!(exact.validate(), VerificationResult::Ok);
    }

    #[test]
    fn sender_report_only_fields_zero_for_receiver_report() {
        let packet = receiver_report(0);
        let view = RtcpView::new(&packet);
        assert_eq!(view.ntp_timestamp(), NtpTimestamp::default());
        assert_eq!(view.rtp_timestamp(), 0);
        assert_eq!(view.packet_count(), 0);
        assert_eq!(view.octet_count(), 0);
    }

    #[test]
    fn sender_report_parses_sender_info() {
        let mut packet = vec![0u8; HEADER_LENGTH + SENDER_INFO_LENGTH];
        packet[0] = 0b1000_0000;
        packet[1] = 200;
        let words = packet.len() / 4 - 1;
        packet[2..4].copy_from_slice(&(words as u16).to_be_bytes());
        packet[4..8].copy_from_slice(&1u32.to_be_bytes());
        packet[8..12].copy_from_slice(&0x1234_5678u32.to_be_bytes());
        packet[12..16].copy_from_slice(&0x9abc_def0u32.to_be_bytes());
        packet[16..20].copy_from_slice(&1000u32.to_be_bytes());
        packet[20..24].copy_from_slice(&42u32.to_be_bytes());
        packet[24..28].copy_from_slice(&4200u32.to_be_bytes());

        let view = RtcpView::new(&packet);
        assert_eq!(view.validate(), VerificationResult::Ok);
        assert_eq!(view.ntp_timestamp(), NtpTimestamp::new(0x1234_5678, 0x9abc_def0));
        assert_eq!(view.rtp_timestamp(), 1000);
        assert_eq!(view.packet_count(), 42);
        assert_eq!(view.octet_count(), 4200);
    }

    #[test]
    fn compound_packet_chains_via_get_next_packet() {
        let mut first = receiver_report(0);
        let second = receiver_report(1);
        first.extend_from_slice(&second);

        let view = RtcpView::new(&first);
        let next = view.get_next_packet();
        assert!(next.is_valid());
        assert_eq!(next.reception_report_count(), 1);

        let after_last = next.get_next_packet();
        assert!(!after_last.is_valid());
    }

    #[test]
    fn profile_specific_extension_returns_trailing_bytes() {
        let mut packet = receiver_report(0);
        let words = (packet.len() + 4) / 4 - 1;
        packet[2..4].copy_from_slice(&(words as u16).to_be_bytes());
        packet.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);

        let view = RtcpView::new(&packet);
        assert_eq!(view.profile_specific_extension().as_slice(), &[0xaa, 0xbb, 0xcc, 0xdd]);
    }
}
