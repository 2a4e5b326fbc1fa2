use crate::common::{asm_func_identity, asm_func_instructions, ASM_FUNC_START, MODULE};
use crate::new_session;
use asmbp::debugger::address::RelocatedAddress;
use asmbp::debugger::source_ref::{SourceIdentity, SourceReference};
use asmbp::debugger::Error;

#[test]
fn test_frame_source_is_created_once() {
    let mut session = new_session();
    let start = RelocatedAddress::from(ASM_FUNC_START);

    let first = session.frame_source(asm_func_identity(), start).unwrap();
    let second = session
        .frame_source(asm_func_identity(), start.offset(1))
        .unwrap();

    assert_eq!(first.reference, second.reference);
    assert_eq!(first.line, 1);
    assert_eq!(second.line, 2);
    assert_eq!(session.mapper().instruction_count(first.reference), 4);
}

#[test]
fn test_line_address_stability() {
    let mut session = new_session();
    let reference = session.source_for(asm_func_identity()).unwrap();

    for (idx, instruction) in asm_func_instructions().iter().enumerate() {
        let line = idx as i64 + 1;
        let addr = session.mapper().line_to_address(reference, line).unwrap();
        assert_eq!(addr, instruction.address);
        assert_eq!(session.mapper().address_to_line(reference, addr), Some(line));
    }
}

#[test]
fn test_source_content() {
    let mut session = new_session();
    let reference = session.source_for(asm_func_identity()).unwrap();

    let content = session.source_content(reference.as_i64()).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "0x00000000002000: push");
    assert_eq!(lines[3], "0x00000000002005: ret");

    assert!(matches!(
        session.source_content(0),
        Err(Error::InvalidSourceReference(_))
    ));
}

#[test]
fn test_failed_disassembly_allocates_nothing() {
    let mut session = new_session();
    let start = RelocatedAddress::from(0x3000_usize);
    let identity = SourceIdentity::new(MODULE, None, start, start.offset(4));

    assert!(session.frame_source(identity, start).is_err());
    assert!(!session.registry().is_valid(SourceReference::from(1)));

    let reference = session.source_for(asm_func_identity()).unwrap();
    assert_eq!(reference.as_i64(), 1);
}

#[test]
fn test_frame_outside_of_source() {
    let mut session = new_session();
    let pc = RelocatedAddress::from(ASM_FUNC_START + 0x100);
    assert!(matches!(
        session.frame_source(asm_func_identity(), pc),
        Err(Error::AddressNotMapped(_, _))
    ));
    assert!(session.frame_source_at(pc).is_none());
}
