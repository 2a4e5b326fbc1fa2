use crate::common::{
    asm_func_identity, Stop, TestHooks, TestInfo, TestProvider, TestTarget, ASM_FUNC_START,
};
use crate::new_session;
use asmbp::debugger::address::RelocatedAddress;
use asmbp::debugger::engine::{BreakpointEngine, EngineBreakpointHandle};
use asmbp::debugger::report::INVALID_SOURCE_REFERENCE;
use asmbp::debugger::{Session, SourceKey, FILE_SOURCE_UNSUPPORTED};

fn asm_func_start() -> RelocatedAddress {
    RelocatedAddress::from(ASM_FUNC_START)
}

fn expect_stop_at(stop: Stop, pc: RelocatedAddress) -> Vec<EngineBreakpointHandle> {
    match stop {
        Stop::Breakpoint { pc: stop_pc, handles } => {
            assert_eq!(stop_pc, pc);
            handles
        }
        Stop::Exited => panic!("expected stop at {pc}, program exited"),
    }
}

#[test]
fn test_break_on_invalid_source_reference() {
    let mut session = new_session();

    for reference in [-1, 0, 200] {
        let records = session.set_breakpoints(reference, &[1]);
        assert_eq!(records.len(), 1);
        assert!(!records[0].verified);
        assert_eq!(records[0].id, None);
        assert_eq!(records[0].message.as_deref(), Some(INVALID_SOURCE_REFERENCE));
    }

    // a valid reference nearby does not make 200 valid
    let frame = session.frame_source(asm_func_identity(), asm_func_start()).unwrap();
    let records = session.set_breakpoints(200, &[1, 2]);
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.message.as_deref() == Some(INVALID_SOURCE_REFERENCE)));
    assert_eq!(session.engine().installed_count(), 0);
    assert!(session.registry().is_valid(frame.reference));
}

#[test]
fn test_can_break_in_source_references() {
    let info = TestInfo::default();
    let mut session = Session::with_hooks(
        crate::common::TestEngine::default(),
        TestProvider::default(),
        TestHooks::new(info.clone()),
    );
    let mut target = TestTarget::new();

    // function breakpoint is installed by another component directly in the engine
    let func_brkpt = session
        .engine_mut()
        .create_breakpoint(asm_func_start())
        .unwrap();

    let handles = expect_stop_at(target.resume(session.engine()), asm_func_start());
    assert_eq!(handles, vec![func_brkpt]);
    assert!(session.on_breakpoint_hit(func_brkpt).is_none());

    let frame = session.frame_source(asm_func_identity(), asm_func_start()).unwrap();
    assert_eq!(frame.line, 1);
    assert_eq!(*info.created.borrow(), vec![frame.reference]);

    let records = session.set_breakpoints(frame.reference.as_i64(), &[frame.line + 1]);
    assert_eq!(records.len(), 1);
    assert!(records[0].verified);
    assert_eq!(records[0].line, frame.line + 1);
    let next_line_addr = session
        .mapper()
        .line_to_address(frame.reference, frame.line + 1)
        .unwrap();

    // assembly breakpoint in the same call
    let handles = expect_stop_at(target.resume(session.engine()), next_line_addr);
    let hit = session.on_breakpoint_hit(handles[0]).unwrap();
    assert_eq!(hit.line, frame.line + 1);
    assert_eq!(Some(hit.id.as_u64()), records[0].id);
    assert_eq!(info.last_hit.get(), Some(hit));
    assert_eq!(
        session.frame_source_at(next_line_addr).unwrap().line,
        frame.line + 1
    );

    // next call: function breakpoint first, then assembly one
    expect_stop_at(target.resume(session.engine()), asm_func_start());
    let handles = expect_stop_at(target.resume(session.engine()), next_line_addr);
    assert_eq!(session.on_breakpoint_hit(handles[0]).unwrap().hit_count, 2);

    // clear assembly breakpoints, only function breakpoint is hit afterwards
    let records = session.set_breakpoints(frame.reference.as_i64(), &[]);
    assert!(records.is_empty());
    let handles = expect_stop_at(target.resume(session.engine()), asm_func_start());
    assert_eq!(handles, vec![func_brkpt]);
    assert_eq!(target.resume(session.engine()), Stop::Exited);
}

#[test]
fn test_repeated_request_keeps_breakpoints() {
    let mut session = new_session();
    let frame = session.frame_source(asm_func_identity(), asm_func_start()).unwrap();
    let reference = frame.reference.as_i64();

    let first = session.set_breakpoints(reference, &[2, 4]);
    let created = session.engine().created;
    let second = session.set_breakpoints(reference, &[2, 4]);

    assert_eq!(first, second);
    assert_eq!(session.engine().created, created);
    assert_eq!(session.engine().removed, 0);
}

#[test]
fn test_breakpoints_results_in_request_order() {
    let mut session = new_session();
    let frame = session.frame_source(asm_func_identity(), asm_func_start()).unwrap();
    let reference = frame.reference.as_i64();

    let records = session.set_breakpoints(reference, &[4, 9, 2, 4]);
    let lines: Vec<_> = records.iter().map(|r| r.line).collect();
    assert_eq!(lines, vec![4, 9, 2, 4]);
    assert!(records[0].verified);
    assert!(!records[1].verified);
    assert!(records[1].id.is_none());
    assert!(records[1].message.is_some());
    assert_ne!(
        records[1].message.as_deref(),
        Some(INVALID_SOURCE_REFERENCE)
    );
    assert_eq!(records[0], records[3]);
    assert_eq!(session.engine().installed_count(), 2);
}

#[test]
fn test_module_unload() {
    let info = TestInfo::default();
    let mut session = Session::with_hooks(
        crate::common::TestEngine::default(),
        TestProvider::default(),
        TestHooks::new(info.clone()),
    );
    let frame = session.frame_source(asm_func_identity(), asm_func_start()).unwrap();
    let reference = frame.reference.as_i64();
    let records = session.set_breakpoints(reference, &[3]);
    assert!(records[0].verified);

    let identity = asm_func_identity();
    session
        .engine_mut()
        .invalidate_range(identity.start, identity.end);
    // breakpoint dropped by the target is reported as unverified, id is kept
    let records_after_unload = session.set_breakpoints(reference, &[3]);
    assert!(!records_after_unload[0].verified);
    assert_eq!(records_after_unload[0].id, records[0].id);

    let invalidated = session.unload_module(std::path::Path::new(crate::common::MODULE));
    assert_eq!(invalidated, vec![frame.reference]);
    assert_eq!(*info.invalidated.borrow(), vec![frame.reference]);

    let records = session.set_breakpoints(reference, &[3]);
    assert_eq!(records[0].message.as_deref(), Some(INVALID_SOURCE_REFERENCE));
    assert!(session.source_content(reference).is_err());
}

#[test]
fn test_file_sources_are_not_handled() {
    let mut session = new_session();
    let records =
        session.set_source_breakpoints(&SourceKey::File("/tmp/main.c".into()), &[10, 11]);
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| !r.verified && r.message.as_deref() == Some(FILE_SOURCE_UNSUPPORTED)));

    let records = session.set_source_breakpoints(&SourceKey::Reference(-1), &[1]);
    assert_eq!(records[0].message.as_deref(), Some(INVALID_SOURCE_REFERENCE));
}

#[test]
fn test_module_unload_kills_engine_breakpoints() {
    let mut session = new_session();
    let identity = asm_func_identity();
    let old = session.source_for(identity.clone()).unwrap();
    session.set_breakpoints(old.as_i64(), &[2]);
    let old_addr = session.mapper().line_to_address(old, 2).unwrap();
    let handle = session.engine().handles_at(old_addr)[0];

    session.unload_module(std::path::Path::new(crate::common::MODULE));
    assert!(!session.engine().is_alive(handle));
    assert_eq!(session.engine().installed_count(), 0);
    assert_eq!(
        *session.provider().evicted.borrow(),
        vec![(identity.start, identity.end)]
    );

    // module loaded again at the same range, orphaned breakpoint is swept without
    // touching the new code
    let new = session.source_for(identity).unwrap();
    assert_ne!(old, new);
    let records = session.set_breakpoints(new.as_i64(), &[3]);
    assert!(records[0].verified);
    assert_eq!(session.engine().installed_count(), 1);
    assert!(session.reconciler().table(old).is_none());
}
