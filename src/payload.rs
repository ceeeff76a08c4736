use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

/// One of the three reference payloads exchanged with the test servers.
///
/// The servers verify uploads byte for byte, so the table is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum PayloadKind {
    Short,
    Middle,
    Long,
}

impl PayloadKind {
    /// Resource name on the HTTP/CoAP servers and topic suffix on the broker.
    pub fn name(self) -> &'static str {
        match self {
            PayloadKind::Short => "short",
            PayloadKind::Middle => "middle",
            PayloadKind::Long => "long",
        }
    }

    pub fn bytes(self) -> &'static [u8] {
        match self {
            PayloadKind::Short => SHORT,
            PayloadKind::Middle => MIDDLE,
            PayloadKind::Long => LONG,
        }
    }

    /// MQTT topic used by the broker for this payload.
    pub fn topic(self) -> String {
        format!("/{}", self.name())
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PayloadKind {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(PayloadKind::Short),
            "middle" => Ok(PayloadKind::Middle),
            "long" => Ok(PayloadKind::Long),
            _ => Err(()),
        }
    }
}

const SHORT: &[u8] = b"It is a simple short response.\n";

const MIDDLE: &[u8] = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. Integer nisl magna, varius et nunc ut, pharetra posuere ante. \
    Praesent vestibulum tempor vehicula. Nunc vehicula a elit at rhoncus. Proin luctus ex at sapien pretium, a consequat magna maximus. \
    Nunc scelerisque nunc et enim pellentesque, eu porta diam aliquet. Mauris mollis congue justo, ac volutpat nibh consequat sit amet. \
    Vestibulum ante ipsum primis in faucibus orci luctus et ultrices posuere cubilia curae; Curabitur congue nibh ut efficitur est.\n\n";

const LONG: &[u8] = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. Integer quam nulla, tincidunt nec dolor ut, \
    convallis finibus est. Aenean pretium nulla eu dolor ultrices maximus. Phasellus laoreet metus et pellentesque ornare. \
    Praesent ac purus sed quam pulvinar cursus. Suspendisse dictum mollis est non tincidunt. In posuere mauris justo, \
    nec rhoncus tortor vestibulum at. Aenean in lorem augue. Maecenas ante elit, tempor id ante in, pellentesque congue nisl.\n\n\
    Curabitur sit amet pulvinar turpis. Suspendisse potenti. Aenean porta, arcu sed sollicitudin commodo, ante dolor suscipit eros, \
    vitae eleifend velit felis ac risus. Sed vehicula mi sed ultrices ullamcorper. Nulla fringilla ac lacus viverra egestas. \
    Suspendisse metus ligula, ultricies et egestas in, sodales vitae nunc. Quisque aliquam dolor fringilla venenatis aliquam. \
    Praesent tellus diam, luctus eu risus in, scelerisque auctor nunc. Donec odio nibh, venenatis eget condimentum eu, tristique \
    facilisis nunc. Proin arcu ex, congue malesuada consequat a, tempor eu justo. Vivamus sapien magna, venenatis at interdum ut, \
    eleifend eget velit.\n\n\
    Sed a efficitur eros. Vestibulum mattis blandit malesuada. Donec leo quam, facilisis ac tortor eu, fringilla tempus neque. \
    Vestibulum volutpat, diam vel vulputate molestie, nunc velit mollis ipsum, vitae pulvinar urna neque nec leo. Curabitur elit tortor, \
    venenatis sed malesuada at, efficitur quis risus. Fusce ac tellus et ipsum viverra consequat. Proin pretium commodo lacus, \
    quis vestibulum nisl consequat eu. Morbi maximus, neque in tempus finibus, lacus odio tempus magna, sit amet pretium libero.\n\n";
