//! Locate command: show how an index maps onto RAM rows.

use stful::WidthClass;
use stful_codec::{MAX_SALU_INSTR, MAX_VPN, decompose_index, indirect_ptr, row_addr};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

pub fn cmd_locate(width: WidthClass, index: u32, vpn: u32, instr: u8) -> i32 {
    if vpn > MAX_VPN {
        terminal::error(&format!("vpn {vpn} exceeds {MAX_VPN}"));
        return EXIT_FAILURE;
    }
    if instr > MAX_SALU_INSTR {
        terminal::error(&format!("instruction {instr} exceeds {MAX_SALU_INSTR}"));
        return EXIT_FAILURE;
    }

    let parts = decompose_index(width, index);
    println!("width     {width}");
    println!("index     {index}");
    println!("ram       {}", parts.ram);
    println!("line      {}", parts.line);
    println!("subword   {}", parts.subword);
    println!("row addr  {:#x}", row_addr(vpn, parts.line));
    println!(
        "pointer   {:#010x}",
        indirect_ptr(width, vpn, parts.line, parts.subword, instr)
    );
    EXIT_SUCCESS
}
