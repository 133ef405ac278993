//! Wire protocol - fixed-layout big-endian frames.
//!
//! Every message starts with a one-byte tag and has a length implied by
//! that tag, so framing needs no length prefix: a parser peeks the tag,
//! looks up the frame length, and waits until that many bytes are buffered
//! before consuming anything.

use thiserror::Error;

use crate::types::{
    ClientId, ExecType, ExecutionReport, Order, OrderId, OrderType, RejectReason, Side,
    TimeInForce, Trade,
};

/// Frame lengths, tag byte included.
pub const ORDER_NEW_LEN: usize = 24;
pub const ORDER_CANCEL_LEN: usize = 9;
pub const EXEC_REPORT_LEN: usize = 32;
pub const TRADE_LEN: usize = 38;
pub const LOGIN_RESPONSE_LEN: usize = 5;

/// First byte of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    OrderNew = 1,
    OrderCancel = 2,
    ExecReport = 3,
    Trade = 4,
    LoginResponse = 5,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MessageType::OrderNew),
            2 => Some(MessageType::OrderCancel),
            3 => Some(MessageType::ExecReport),
            4 => Some(MessageType::Trade),
            5 => Some(MessageType::LoginResponse),
            _ => None,
        }
    }
}

/// Frame length for a tag byte; `None` for unknown tags (protocol error).
pub fn frame_len(tag: u8) -> Option<usize> {
    Some(match MessageType::from_tag(tag)? {
        MessageType::OrderNew => ORDER_NEW_LEN,
        MessageType::OrderCancel => ORDER_CANCEL_LEN,
        MessageType::ExecReport => EXEC_REPORT_LEN,
        MessageType::Trade => TRADE_LEN,
        MessageType::LoginResponse => LOGIN_RESPONSE_LEN,
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("expected tag {expected} but found {found}")]
    WrongTag { expected: u8, found: u8 },
    #[error("frame needs {expected} bytes but only {got} present")]
    Truncated { expected: usize, got: usize },
    #[error("invalid {field} byte {value}")]
    InvalidEnum { field: &'static str, value: u8 },
}

fn check_frame(buf: &[u8], tag: MessageType, len: usize) -> Result<(), WireError> {
    if buf.len() < len {
        return Err(WireError::Truncated {
            expected: len,
            got: buf.len(),
        });
    }
    if buf[0] != tag as u8 {
        return Err(WireError::WrongTag {
            expected: tag as u8,
            found: buf[0],
        });
    }
    Ok(())
}

#[inline]
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

#[inline]
fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

/// ORDER_NEW: tag, order_id(8), price(8), quantity(4), side, order_type, tif
pub fn encode_order(order: &Order) -> [u8; ORDER_NEW_LEN] {
    let mut buf = [0u8; ORDER_NEW_LEN];
    buf[0] = MessageType::OrderNew as u8;
    buf[1..9].copy_from_slice(&order.order_id.to_be_bytes());
    buf[9..17].copy_from_slice(&order.price.to_be_bytes());
    buf[17..21].copy_from_slice(&order.quantity.to_be_bytes());
    buf[21] = order.side as u8;
    buf[22] = order.order_type as u8;
    buf[23] = order.tif as u8;
    buf
}

pub fn decode_order(buf: &[u8]) -> Result<Order, WireError> {
    check_frame(buf, MessageType::OrderNew, ORDER_NEW_LEN)?;
    Ok(Order {
        order_id: read_u64(buf, 1),
        price: read_u64(buf, 9),
        quantity: read_u32(buf, 17),
        side: Side::from_wire(buf[21]).ok_or(WireError::InvalidEnum {
            field: "side",
            value: buf[21],
        })?,
        order_type: OrderType::from_wire(buf[22]).ok_or(WireError::InvalidEnum {
            field: "order_type",
            value: buf[22],
        })?,
        tif: TimeInForce::from_wire(buf[23]).ok_or(WireError::InvalidEnum {
            field: "tif",
            value: buf[23],
        })?,
    })
}

/// ORDER_CANCEL: tag, order_id(8)
pub fn encode_cancel(order_id: OrderId) -> [u8; ORDER_CANCEL_LEN] {
    let mut buf = [0u8; ORDER_CANCEL_LEN];
    buf[0] = MessageType::OrderCancel as u8;
    buf[1..9].copy_from_slice(&order_id.to_be_bytes());
    buf
}

pub fn decode_cancel(buf: &[u8]) -> Result<OrderId, WireError> {
    check_frame(buf, MessageType::OrderCancel, ORDER_CANCEL_LEN)?;
    Ok(read_u64(buf, 1))
}

/// LOGIN_RESPONSE: tag, client_id(4)
pub fn encode_login(client_id: ClientId) -> [u8; LOGIN_RESPONSE_LEN] {
    let mut buf = [0u8; LOGIN_RESPONSE_LEN];
    buf[0] = MessageType::LoginResponse as u8;
    buf[1..5].copy_from_slice(&client_id.to_be_bytes());
    buf
}

pub fn decode_login(buf: &[u8]) -> Result<ClientId, WireError> {
    check_frame(buf, MessageType::LoginResponse, LOGIN_RESPONSE_LEN)?;
    Ok(read_u32(buf, 1))
}

/// EXEC_REPORT: tag, client_id(4), order_id(8), price(8), last_qty(4),
/// remaining_qty(4), type, reason, side
pub fn encode_execution_report(report: &ExecutionReport) -> [u8; EXEC_REPORT_LEN] {
    let mut buf = [0u8; EXEC_REPORT_LEN];
    buf[0] = MessageType::ExecReport as u8;
    buf[1..5].copy_from_slice(&report.client_id.to_be_bytes());
    buf[5..13].copy_from_slice(&report.order_id.to_be_bytes());
    buf[13..21].copy_from_slice(&report.price.to_be_bytes());
    buf[21..25].copy_from_slice(&report.last_quantity.to_be_bytes());
    buf[25..29].copy_from_slice(&report.remaining_quantity.to_be_bytes());
    buf[29] = report.exec_type as u8;
    buf[30] = report.reason as u8;
    buf[31] = report.side as u8;
    buf
}

pub fn decode_execution_report(buf: &[u8]) -> Result<ExecutionReport, WireError> {
    check_frame(buf, MessageType::ExecReport, EXEC_REPORT_LEN)?;
    Ok(ExecutionReport {
        client_id: read_u32(buf, 1),
        order_id: read_u64(buf, 5),
        price: read_u64(buf, 13),
        last_quantity: read_u32(buf, 21),
        remaining_quantity: read_u32(buf, 25),
        exec_type: ExecType::from_wire(buf[29]).ok_or(WireError::InvalidEnum {
            field: "exec_type",
            value: buf[29],
        })?,
        reason: RejectReason::from_wire(buf[30]).ok_or(WireError::InvalidEnum {
            field: "reason",
            value: buf[30],
        })?,
        side: Side::from_wire(buf[31]).ok_or(WireError::InvalidEnum {
            field: "side",
            value: buf[31],
        })?,
    })
}

/// TRADE: tag, maker_id(8), taker_id(8), time_stamp(8), price(8),
/// quantity(4), aggressor_side
pub fn encode_trade(trade: &Trade) -> [u8; TRADE_LEN] {
    let mut buf = [0u8; TRADE_LEN];
    buf[0] = MessageType::Trade as u8;
    buf[1..9].copy_from_slice(&trade.maker_order_id.to_be_bytes());
    buf[9..17].copy_from_slice(&trade.taker_order_id.to_be_bytes());
    buf[17..25].copy_from_slice(&trade.time_stamp.to_be_bytes());
    buf[25..33].copy_from_slice(&trade.price.to_be_bytes());
    buf[33..37].copy_from_slice(&trade.quantity.to_be_bytes());
    buf[37] = trade.aggressor_side as u8;
    buf
}

pub fn decode_trade(buf: &[u8]) -> Result<Trade, WireError> {
    check_frame(buf, MessageType::Trade, TRADE_LEN)?;
    Ok(Trade {
        maker_order_id: read_u64(buf, 1),
        taker_order_id: read_u64(buf, 9),
        time_stamp: read_u64(buf, 17),
        price: read_u64(buf, 25),
        quantity: read_u32(buf, 33),
        aggressor_side: Side::from_wire(buf[37]).ok_or(WireError::InvalidEnum {
            field: "aggressor_side",
            value: buf[37],
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_round_trip_extremes() {
        for order in [
            Order {
                order_id: 0,
                price: 0,
                quantity: 0,
                side: Side::Bid,
                order_type: OrderType::Limit,
                tif: TimeInForce::Gtc,
            },
            Order {
                order_id: u64::MAX,
                price: u64::MAX,
                quantity: u32::MAX,
                side: Side::Ask,
                order_type: OrderType::Market,
                tif: TimeInForce::Ioc,
            },
        ] {
            let buf = encode_order(&order);
            assert_eq!(decode_order(&buf), Ok(order));
        }
    }

    #[test]
    fn test_order_encoding_is_big_endian() {
        let order = Order {
            order_id: 0x0102_0304_0506_0708,
            price: 10_000,
            quantity: 7,
            side: Side::Ask,
            order_type: OrderType::Limit,
            tif: TimeInForce::Ioc,
        };
        let buf = encode_order(&order);
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf[21], 1);
        assert_eq!(buf[23], 1);
    }

    #[test]
    fn test_cancel_and_login_round_trip() {
        let buf = encode_cancel(u64::MAX - 1);
        assert_eq!(decode_cancel(&buf), Ok(u64::MAX - 1));

        let buf = encode_login(u32::MAX);
        assert_eq!(decode_login(&buf), Ok(u32::MAX));
    }

    #[test]
    fn test_execution_report_round_trip_all_variants() {
        for exec_type in [
            ExecType::New,
            ExecType::Canceled,
            ExecType::Rejected,
            ExecType::Trade,
            ExecType::Expired,
        ] {
            for reason in [
                RejectReason::None,
                RejectReason::OrderNotFound,
                RejectReason::PriceInvalid,
                RejectReason::QuantityInvalid,
                RejectReason::MarketClosed,
                RejectReason::SelfTrade,
                RejectReason::InvalidOrderType,
            ] {
                let report = ExecutionReport {
                    client_id: 42,
                    order_id: u64::MAX,
                    price: 10_499,
                    last_quantity: 17,
                    remaining_quantity: u32::MAX,
                    exec_type,
                    reason,
                    side: Side::Ask,
                };
                let buf = encode_execution_report(&report);
                assert_eq!(decode_execution_report(&buf), Ok(report));
            }
        }
    }

    #[test]
    fn test_trade_round_trip() {
        let trade = Trade {
            maker_order_id: u64::MAX,
            taker_order_id: 1,
            time_stamp: u64::MAX - 5,
            price: 9_500,
            quantity: u32::MAX,
            aggressor_side: Side::Bid,
        };
        let buf = encode_trade(&trade);
        assert_eq!(decode_trade(&buf), Ok(trade));
    }

    #[test]
    fn test_frame_len_per_tag() {
        assert_eq!(frame_len(1), Some(ORDER_NEW_LEN));
        assert_eq!(frame_len(2), Some(ORDER_CANCEL_LEN));
        assert_eq!(frame_len(3), Some(EXEC_REPORT_LEN));
        assert_eq!(frame_len(4), Some(TRADE_LEN));
        assert_eq!(frame_len(5), Some(LOGIN_RESPONSE_LEN));
        assert_eq!(frame_len(0), None);
        assert_eq!(frame_len(6), None);
        assert_eq!(frame_len(255), None);
    }

    #[test]
    fn test_decode_errors() {
        let order = Order {
            order_id: 1,
            price: 10_000,
            quantity: 5,
            side: Side::Bid,
            order_type: OrderType::Limit,
            tif: TimeInForce::Gtc,
        };
        let buf = encode_order(&order);

        assert_eq!(
            decode_order(&buf[..10]),
            Err(WireError::Truncated {
                expected: ORDER_NEW_LEN,
                got: 10
            })
        );

        let mut wrong_tag = buf;
        wrong_tag[0] = MessageType::Trade as u8;
        assert_eq!(
            decode_order(&wrong_tag),
            Err(WireError::WrongTag {
                expected: 1,
                found: 4
            })
        );

        let mut bad_side = buf;
        bad_side[21] = 9;
        assert_eq!(
            decode_order(&bad_side),
            Err(WireError::InvalidEnum {
                field: "side",
                value: 9
            })
        );
    }
}
