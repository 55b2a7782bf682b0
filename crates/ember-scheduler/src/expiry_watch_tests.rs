    use super::*;
    use crate::expiry::NO_PENDING_EXPIRY;
    use crate::tier::Tier;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn line(subject: &str, expires: i64) -> String {
        format!("{} admin 1000 {}", subject, expires)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_scan_fires_expired_and_keeps_pending() {
        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::in_memory("muted"));
        list.push_line(line("a", 10_010));
        list.push_line(line("b", 10_005));
        list.push_line("garbage");
        list.push_line(line("c", 10_020));

        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = fired.clone();
        let watch = ExpiryWatch::new(list.clone(), scheduler.clone(), move |record| {
            f.lock().push(record.subject.clone());
            Ok(())
        });

        let scan = watch.scan(at(10_000));
        assert_eq!(scan.removed, 0);
        assert_eq!(scan.skipped, 1);
        assert_eq!(scan.next_delay, Duration::from_secs(5));

        let scan = watch.scan(at(10_006));
        assert_eq!(scan.removed, 1);
        assert_eq!(*fired.lock(), vec!["b"]);
        assert_eq!(scan.next_delay, Duration::from_secs(4));
        assert_eq!(list.len(), 3);
        scheduler.stop();
    }

    #[test]
    fn test_records_sharing_expiry_fire_together() {
        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::in_memory("frozen"));
        list.push_line(line("a", 500));
        list.push_line(line("b", 500));
        list.push_line(line("c", 900));

        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let watch = ExpiryWatch::new(list.clone(), scheduler.clone(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let scan = watch.scan(at(500));
        assert_eq!(scan.removed, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scan.next_delay, Duration::from_secs(400));
        scheduler.stop();
    }

    #[test]
    fn test_failed_callback_keeps_record_and_retries() {
        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::in_memory("tempranks"));
        list.push_line(line("broken", 100));
        list.push_line(line("fine", 100));

        let watch = ExpiryWatch::new(list.clone(), scheduler.clone(), |record| {
            if record.subject == "broken" {
                Err("rank no longer exists".into())
            } else {
                Ok(())
            }
        });

        let scan = watch.scan(at(200));
        assert_eq!(scan.removed, 1);
        assert_eq!(scan.failed, 1);
        assert_eq!(scan.next_delay, crate::expiry::EXPIRY_RETRY_DELAY);
        assert_eq!(list.lines(), vec![line("broken", 100)]);
        scheduler.stop();
    }

    #[test]
    fn test_empty_list_uses_sentinel() {
        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::in_memory("muted"));
        list.push_line(line("only", 100));

        let watch = ExpiryWatch::new(list.clone(), scheduler.clone(), |_| Ok(()));
        let scan = watch.scan(at(100));
        assert_eq!(scan.removed, 1);
        assert_eq!(scan.next_delay, NO_PENDING_EXPIRY);
        assert!(list.is_empty());
        scheduler.stop();
    }

    #[test]
    fn test_callback_may_touch_the_list() {
        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::in_memory("tempranks"));
        list.push_line(line("a", 100));

        let inner = list.clone();
        let watch = ExpiryWatch::new(list.clone(), scheduler.clone(), move |record| {
            // Mirrors a rank callback that looks the record up again.
            assert!(inner.find(&record.subject).is_some());
            inner.push_line(line("added-during-expiry", 5_000));
            Ok(())
        });

        let scan = watch.scan(at(100));
        assert_eq!(scan.removed, 1);
        assert_eq!(list.lines(), vec![line("added-during-expiry", 5_000)]);
        assert_eq!(scan.next_delay, Duration::from_secs(4_900));
        scheduler.stop();
    }

    #[test]
    fn test_scan_persists_removals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("muted.txt");
        std::fs::write(&path, format!("{}\n{}\n", line("a", 100), line("b", 9_999_999_999))).unwrap();

        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::load("muted", &path).unwrap());
        let watch = ExpiryWatch::new(list, scheduler.clone(), |_| Ok(()));
        watch.scan(at(200));

        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(saved.trim(), line("b", 9_999_999_999));
        scheduler.stop();
    }

    #[test]
    fn test_recalculate_after_adding_record() {
        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::in_memory("muted"));
        let fired = Arc::new(AtomicU32::new(0));

        let f = fired.clone();
        let watch = ExpiryWatch::new(list.clone(), scheduler.clone(), move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let task = watch.start();
        assert_eq!(task.delay(), NO_PENDING_EXPIRY);

        // Let the tier go to sleep on the sentinel.
        std::thread::sleep(Duration::from_millis(50));

        let now = Utc::now();
        list.upsert(&ExpiryRecord::new("eve", "admin", now, now + chrono::Duration::seconds(1)));
        watch.recalculate();
        assert!(task.delay() <= Duration::from_secs(1));

        assert!(wait_until(Duration::from_secs(4), || fired.load(Ordering::SeqCst) == 1));
        assert!(wait_until(Duration::from_secs(1), || list.is_empty()));
        assert!(wait_until(Duration::from_secs(1), || task.delay() == NO_PENDING_EXPIRY));
        scheduler.stop();
    }

    #[test]
    fn test_record_added_during_scan_is_not_lost() {
        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::in_memory("muted"));
        let watch = ExpiryWatch::new(list.clone(), scheduler.clone(), |_| Ok(()));
        let task = watch.start();

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let adder = {
            let list = list.clone();
            let watch = watch.clone();
            std::thread::spawn(move || {
                started_rx.recv().unwrap();
                let now = Utc::now();
                list.upsert(&ExpiryRecord::new("eve", "admin", now, now + chrono::Duration::seconds(5)));
                watch.recalculate();
            })
        };

        // The scan saw an empty list; the adder runs while its delay is applied.
        let scan = watch.scan_with(Utc::now(), |delay| {
            started_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(100));
            task.set_delay(delay);
        });
        assert_eq!(scan.next_delay, NO_PENDING_EXPIRY);
        adder.join().unwrap();

        assert_eq!(list.len(), 1);
        assert!(task.delay() <= Duration::from_secs(5));
        watch.stop();
        scheduler.stop();
    }

    #[test]
    fn test_stop_cancels_task() {
        let scheduler = Scheduler::start(Tier::Main).unwrap();
        let list = Arc::new(ExpiryList::in_memory("frozen"));
        let watch = ExpiryWatch::new(list, scheduler.clone(), |_| Ok(()));

        let task = watch.start();
        assert!(scheduler.queue().contains(task.id()));
        watch.stop();
        assert!(task.is_cancelled());
        assert!(watch.task().is_none());
        scheduler.stop();
    }
