// Shared test fixture: an `Engine` wired to a `FakeClock` the test can
// advance deliberately, plus `FixedJitter` so probe/announce timing is
// exact instead of randomised (spec.md section 8, scenario 1).

use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Instant;

use mdnsd::{Clock, Engine, EngineConfig, FakeClock, FixedJitter};

pub struct ClockProxy(pub Rc<FakeClock>);

impl Clock for ClockProxy {
    fn now(&self) -> Instant {
        self.0.now()
    }
}

pub fn test_engine() -> (Engine, Rc<FakeClock>) {
    let clock = Rc::new(FakeClock::new());
    let mut engine = Engine::with_deps(
        EngineConfig::default(),
        Box::new(ClockProxy(clock.clone())),
        Box::new(FixedJitter),
    );
    engine.set_address(Ipv4Addr::new(10, 0, 0, 42));
    (engine, clock)
}
