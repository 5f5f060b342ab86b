//! CRC-16/USB: polynomial 0x8005 processed in reflected form (0xA001),
//! initial register 0xFFFF, final XOR 0xFFFF.

use crc::{Crc, CRC_16_USB};

const CRC16_USB: Crc<u16> = Crc::<u16>::new(&CRC_16_USB);

pub fn crc16_usb(data: &[u8]) -> u16 {
    CRC16_USB.checksum(data)
}
