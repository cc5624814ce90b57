use crate::prelude::*;
use crate::transport::{RegisterConnection, RegisterTransport};

use async_trait::async_trait;
use tokio_modbus::client::{rtu, Client, Context as ModbusContext, Reader};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_modbus::Slave;
use tokio_serial::SerialPortBuilderExt;

/// Modbus RTU over a local serial port, 8N1.
#[derive(Clone, Debug)]
pub struct ModbusRtuTransport {
    port: String,
    baudrate: u32,
    station_id: u8,
    timeout: std::time::Duration,
}

impl ModbusRtuTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.port().to_string(),
            baudrate: config.baudrate(),
            station_id: config.station_id(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl RegisterTransport for ModbusRtuTransport {
    fn describe(&self) -> String {
        format!(
            "{} @ {} baud, station {}",
            self.port, self.baudrate, self.station_id
        )
    }

    async fn connect(&self) -> Result<Box<dyn RegisterConnection>, ConnectFailure> {
        let serial = tokio_serial::new(&self.port, self.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| ConnectFailure::Open {
                port: self.port.clone(),
                source: e.into(),
            })?;

        Ok(Box::new(ModbusRtuConnection::attach(serial, Slave(self.station_id))))
    }
}

struct ModbusRtuConnection {
    ctx: ModbusContext,
}

impl ModbusRtuConnection {
    fn attach<T>(io: T, slave: Slave) -> Self
    where
        T: AsyncRead + AsyncWrite + std::fmt::Debug + Unpin + Send + 'static,
    {
        Self {
            ctx: rtu::attach_slave(io, slave),
        }
    }
}

#[async_trait]
impl RegisterConnection for ModbusRtuConnection {
    async fn read_holding_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ReadFailure> {
        match self.ctx.read_holding_registers(start, count).await {
            Ok(Ok(registers)) => Ok(registers),
            Ok(Err(exception)) => Err(ReadFailure::Exception(exception)),
            Err(tokio_modbus::Error::Transport(e)) => Err(ReadFailure::Transport(e)),
            Err(tokio_modbus::Error::Protocol(e)) => Err(ReadFailure::Protocol(format!("{:?}", e))),
        }
    }

    async fn close(&mut self) -> std::io::Result<()> {
        self.ctx.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_modbus::ExceptionCode;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16::State::<crc16::MODBUS>::calculate(body).to_le_bytes());
        frame
    }

    // answers exactly one request with `reply`
    async fn respond(mut device: DuplexStream, reply: Vec<u8>) -> DuplexStream {
        let mut request = [0u8; 8];
        device.read_exact(&mut request).await.unwrap();
        assert_eq!(&request[..6], &[0x07, 0x03, 0x00, 0x0A, 0x00, 0x02]);
        device.write_all(&reply).await.unwrap();
        device
    }

    #[tokio::test]
    async fn holding_register_reply_is_returned_as_is() {
        let (host, device) = tokio::io::duplex(256);
        let mut connection = ModbusRtuConnection::attach(host, Slave(7));
        let device = tokio::spawn(respond(
            device,
            frame(&[0x07, 0x03, 0x04, 0x00, 0xFA, 0x01, 0xF4]),
        ));

        let registers = connection.read_holding_registers(10, 2).await.unwrap();

        assert_eq!(registers, vec![250, 500]);
        device.await.unwrap();
    }

    #[tokio::test]
    async fn exception_frame_is_an_exception_failure() {
        let (host, device) = tokio::io::duplex(256);
        let mut connection = ModbusRtuConnection::attach(host, Slave(7));
        let device = tokio::spawn(respond(device, frame(&[0x07, 0x83, 0x02])));

        let err = connection.read_holding_registers(10, 2).await.unwrap_err();

        assert!(
            matches!(err, ReadFailure::Exception(ExceptionCode::IllegalDataAddress)),
            "unexpected {:?}",
            err
        );
        device.await.unwrap();
    }

    #[tokio::test]
    async fn closed_line_is_a_transport_failure() {
        let (host, device) = tokio::io::duplex(256);
        let mut connection = ModbusRtuConnection::attach(host, Slave(7));
        drop(device);

        let err = connection.read_holding_registers(10, 2).await.unwrap_err();

        assert!(matches!(err, ReadFailure::Transport(_)), "unexpected {:?}", err);
    }
}
