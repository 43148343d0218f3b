use super::persist;
use super::*;

#[test]
fn test_record_access() {
    let mut buf = Buffer::new(3, 2);
    assert_eq!(buf.count(), 2);
    assert_eq!(buf.get(1).unwrap(), &[0.0, 0.0, 0.0]);

    buf.set(1, &[1.0, 2.0, 3.0]).unwrap();
    buf.get_mut(0).unwrap()[2] = -4.0;
    assert_eq!(buf.as_slice(), &[0.0, 0.0, -4.0, 1.0, 2.0, 3.0]);
    assert_eq!(buf.records().count(), 2);
}

#[test]
fn test_out_of_bounds_is_index_error() {
    let buf = Buffer::new(2, 3);
    assert_eq!(buf.get(3).unwrap_err(), EngineError::Index { index: 3, count: 3 });
}

#[test]
fn test_wrong_record_length_is_argument_error() {
    let mut buf = Buffer::new(2, 1);
    assert!(matches!(buf.set(0, &[1.0]), Err(EngineError::Argument(_))));
    assert!(matches!(
        Buffer::from_vec(2, vec![1.0, 2.0, 3.0]),
        Err(EngineError::Argument(_))
    ));
    assert_eq!(Buffer::from_vec(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap().count(), 2);
}

#[test]
fn test_f32_transfer() {
    let buf = Buffer::from_vec(1, vec![0.5, -2.0, 3.25]).unwrap();
    let narrow = buf.to_f32();
    assert_eq!(narrow, vec![0.5f32, -2.0, 3.25]);

    let back = Buffer::from_f32(1, &narrow).unwrap();
    assert_eq!(back, buf);
    assert!(matches!(Buffer::from_f32(2, &narrow), Err(EngineError::Argument(_))));
    assert_eq!(buf.as_bytes().len(), 3 * 8);
}

#[test]
fn test_views_reinterpret_without_copying() {
    let buf = Buffer::from_vec(3, (0..12).map(f64::from).collect()).unwrap();
    let view = buf.view();
    assert_eq!((view.record_len(), view.count()), (3, 4));

    let pairs = view.reshape(2).unwrap();
    assert_eq!(pairs.count(), 6);
    assert_eq!(pairs.get(5).unwrap(), &[10.0, 11.0]);
    assert!(std::ptr::eq(pairs.as_slice(), buf.as_slice()));

    let middle = view.range(1, 2).unwrap();
    assert_eq!(middle.as_slice(), &[3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    assert_eq!(middle.get(2).unwrap_err(), EngineError::Index { index: 2, count: 2 });

    let each = middle.each();
    assert_eq!((each.record_len(), each.count()), (1, 6));
    assert_eq!(each.records().nth(4), Some(&[7.0][..]));
    assert_eq!(middle.to_buffer().get(1).unwrap(), &[6.0, 7.0, 8.0]);
}

#[test]
fn test_view_bounds_and_shape_errors() {
    let buf = Buffer::new(2, 3);
    assert!(matches!(buf.view().reshape(4), Err(EngineError::Argument(_))));
    assert!(matches!(buf.view().reshape(0), Err(EngineError::Argument(_))));
    assert_eq!(
        buf.view().range(2, 2).unwrap_err(),
        EngineError::Index { index: 4, count: 3 }
    );
    assert_eq!(buf.view().range(3, 0).unwrap().count(), 0);
    assert!(Buffer::new(0, 0).view().reshape(0).is_ok());
}

#[test]
fn test_mutable_view_writes_through() {
    let mut buf = Buffer::new(2, 3);
    {
        let mut tail = buf.view_mut().range(1, 2).unwrap();
        tail.set(0, &[1.0, 2.0]).unwrap();
        assert!(matches!(tail.set(1, &[1.0]), Err(EngineError::Argument(_))));
        let mut cells = tail.each();
        cells.get_mut(3).unwrap()[0] = 9.0;
        assert_eq!(cells.get(3).unwrap(), &[9.0]);
    }
    assert_eq!(buf.as_slice(), &[0.0, 0.0, 1.0, 2.0, 0.0, 9.0]);

    let mut whole = buf.view_mut().reshape(3).unwrap();
    assert_eq!(whole.count(), 2);
    whole.fill(4.0);
    assert!(buf.as_slice().iter().all(|&x| x == 4.0));
}

#[test]
fn test_arena_recycles_and_rejects_stale_ids() {
    let mut arena = BufferArena::new();
    let a = arena.alloc(4, 8);
    arena.get_mut(a).unwrap().fill(7.0);
    arena.free(a).unwrap();

    assert!(matches!(arena.get(a), Err(EngineError::Resource(_))));
    assert!(matches!(arena.free(a), Err(EngineError::Resource(_))));

    let b = arena.alloc(2, 4);
    assert_ne!(a, b);
    // Recycled storage is zeroed.
    assert!(arena.get(b).unwrap().as_slice().iter().all(|&x| x == 0.0));
    assert_eq!(arena.live(), 1);

    arena.reset();
    assert_eq!(arena.live(), 0);
    assert!(arena.get(b).is_err());
}

#[test]
fn test_arena_spare_pool_is_bounded() {
    let mut arena = BufferArena::new();
    let ids: Vec<BufferId> = (1..=40).map(|n| arena.alloc(n, 1)).collect();
    for id in ids {
        arena.free(id).unwrap();
    }
    assert_eq!(arena.spare.len(), MAX_SPARE);
    // The largest freed vectors are the ones kept.
    assert!(arena.spare.iter().all(|v| v.capacity() >= 40 - MAX_SPARE + 1));

    // An allocation no spare fits grows one instead of adding storage.
    let big = arena.alloc(1000, 1);
    assert_eq!(arena.spare.len(), MAX_SPARE - 1);
    arena.free(big).unwrap();
    assert_eq!(arena.spare.len(), MAX_SPARE);
}

#[test]
fn test_checked_out_buffer_returns_to_its_slot() {
    let mut arena = BufferArena::new();
    let id = arena.alloc(2, 2);
    let mut buffer = arena.check_out(id).unwrap();
    assert!(matches!(arena.get(id), Err(EngineError::Resource(_))));
    buffer.fill(5.0);
    arena.check_in(id, buffer);
    assert_eq!(arena.get(id).unwrap().as_slice(), &[5.0; 4]);
}

#[test]
fn test_image_bytes_restore_buffer() {
    let buf = Buffer::from_vec(2, vec![1.0, f64::NAN, -0.0, 4.5]).unwrap();
    let bytes = persist::to_bytes(&buf).unwrap();
    let back = persist::from_bytes(&bytes).unwrap();
    assert_eq!(back.record_len(), 2);
    assert_eq!(back.count(), 2);
    assert!(back.get(0).unwrap()[1].is_nan());
    assert!(back.get(1).unwrap()[0].is_sign_negative());
}

#[test]
fn test_corrupt_image_is_resource_error() {
    assert!(matches!(
        persist::from_bytes(&[1, 2, 3]),
        Err(EngineError::Resource(_))
    ));
}
