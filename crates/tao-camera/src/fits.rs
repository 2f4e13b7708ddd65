//! A minimal FITS writer for saving a shared array's payload to disk.
//!
//! Real FITS I/O (WCS, compression, multi-extension files) is an external
//! collaborator's concern; this only has to produce a primary HDU a
//! standard FITS reader can open, which is all the scenarios that save a
//! single raw frame need.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tao_array::SharedArray;
use tao_error::{bail, ErrorKind, Result};
use tao_geometry::ElementType;

const BLOCK: usize = 2880;
const CARD: usize = 80;

/// Saves a shared array to a FITS file.
pub trait FitsWriter {
    fn save(&self, array: &SharedArray, path: &Path, overwrite: bool) -> Result<()>;
}

/// Writes single-HDU FITS files with no WCS, using the element type's
/// natural `BITPIX`.
pub struct PrimaryHduWriter;

fn bitpix(eltype: ElementType) -> Result<i32> {
    match eltype {
        ElementType::UInt8 | ElementType::Int8 => Ok(8),
        ElementType::Int16 | ElementType::UInt16 => Ok(16),
        ElementType::Int32 | ElementType::UInt32 => Ok(32),
        ElementType::Float32 => Ok(-32),
        ElementType::Float64 => Ok(-64),
        ElementType::Int64 | ElementType::UInt64 => bail("bitpix", ErrorKind::BadEncoding),
    }
}

fn card(text: impl AsRef<str>) -> [u8; CARD] {
    let mut buf = [b' '; CARD];
    let bytes = text.as_ref().as_bytes();
    let n = bytes.len().min(CARD);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

fn pad_to_block(buf: &mut Vec<u8>, fill: u8) {
    let rem = buf.len() % BLOCK;
    if rem != 0 {
        buf.resize(buf.len() + (BLOCK - rem), fill);
    }
}

impl FitsWriter for PrimaryHduWriter {
    fn save(&self, array: &SharedArray, path: &Path, overwrite: bool) -> Result<()> {
        let bp = bitpix(array.eltype())?;
        let naxis = array.ndims();
        if naxis == 0 || naxis > 999 {
            return bail("PrimaryHduWriter::save", ErrorKind::BadRank);
        }

        let mut header = Vec::new();
        header.extend_from_slice(&card(format!("SIMPLE  = {:>20}", "T")));
        header.extend_from_slice(&card(format!("BITPIX  = {bp:>20}")));
        header.extend_from_slice(&card(format!("NAXIS   = {:>20}", naxis)));
        for axis in 0..naxis {
            header.extend_from_slice(&card(format!(
                "NAXIS{}  = {:>20}",
                axis + 1,
                array.size_of_dim(axis)
            )));
        }
        header.extend_from_slice(&card("END"));
        pad_to_block(&mut header, b' ');

        let mut payload = array.data().to_vec();
        if bp == 16 || bp == 32 {
            // FITS integer samples are big-endian regardless of host order.
            swap_native_to_big_endian(&mut payload, (bp.unsigned_abs() / 8) as usize);
        }
        pad_to_block(&mut payload, 0);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .create_new(!overwrite)
            .truncate(overwrite)
            .open(path)
            .map_err(|e| io_error("PrimaryHduWriter::save", &e))?;
        file.write_all(&header)
            .and_then(|()| file.write_all(&payload))
            .map_err(|e| io_error("PrimaryHduWriter::save", &e))
    }
}

fn io_error(function: &'static str, e: &std::io::Error) -> tao_error::TaoError {
    let code = e.raw_os_error().unwrap_or(-1);
    tao_error::TaoError::new(function, ErrorKind::SystemError(code))
}

fn swap_native_to_big_endian(buf: &mut [u8], width: usize) {
    if cfg!(target_endian = "little") {
        for chunk in buf.chunks_exact_mut(width) {
            chunk.reverse();
        }
    }
}
